// Courier Infrastructure - PostgreSQL Adapter
// Implements: JobRepository with FOR UPDATE SKIP LOCKED claiming

mod connection;
mod job_repository;
mod migration;

pub use connection::create_pool;
pub use job_repository::PgJobRepository;
pub use migration::run_migrations;
