pub mod responses;
pub mod todos;
