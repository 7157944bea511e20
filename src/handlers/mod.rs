pub mod diary;
pub mod goals;
pub mod health;
pub mod holidays;
pub mod sync;
pub mod todos;
pub mod ws;
