pub mod health;
pub mod jobs;
pub mod legacy;
pub mod uploads;
