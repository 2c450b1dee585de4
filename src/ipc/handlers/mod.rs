pub mod auth;
pub mod backup_exchange;
pub mod core;
pub mod courses;
pub mod grades;
pub mod incidents;
pub mod internships;
pub mod labs;
pub mod people;
pub mod reservations;
pub mod rooms;
