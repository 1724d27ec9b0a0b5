pub mod academics;
pub mod ai;
pub mod backup;
pub mod classes;
pub mod core;
pub mod institution;
pub mod inventory;
pub mod question_bank;
