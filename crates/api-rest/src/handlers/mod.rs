pub mod health;
pub mod invoices;
pub mod patients;
pub mod soap_notes;
pub mod webhooks;
