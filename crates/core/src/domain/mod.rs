pub mod approval;
pub mod approver;
pub mod budget;
pub mod matrix;
pub mod request;
