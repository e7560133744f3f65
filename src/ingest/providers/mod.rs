pub mod fixture;
pub mod forem;
