pub mod cameras;

pub use cameras::PgConfigurationStore;
