pub mod backend;
pub mod common_data_bus;
pub mod execution_unit;
pub mod register_status;
pub mod reservation_station;
