pub mod catalog;
pub mod certificates;
pub mod console;
pub mod retries;
