pub mod listing;
pub mod records;
pub mod table;
