use serde::Serialize;
use utoipa::ToSchema;

/// Health check response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Simple health service shared by the server binaries.
///
/// Liveness is static; readiness takes the result of a database probe performed by the caller.
#[derive(Clone, Default)]
pub struct HealthService;

impl HealthService {
    pub fn new() -> Self {
        Self
    }

    /// Liveness: the process is up and serving.
    pub fn check_health() -> HealthRes {
        HealthRes {
            ok: true,
            message: "clinic is alive".into(),
        }
    }

    /// Readiness given the outcome of a database ping.
    pub fn with_database(database_ok: bool) -> HealthRes {
        if database_ok {
            Self::check_health()
        } else {
            HealthRes {
                ok: false,
                message: "database unavailable".into(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_database_state() {
        assert!(HealthService::with_database(true).ok);
        let down = HealthService::with_database(false);
        assert!(!down.ok);
        assert_eq!(down.message, "database unavailable");
    }
}
