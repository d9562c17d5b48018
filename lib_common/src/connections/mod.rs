pub mod db_postgres;
pub mod transport_redis;

pub use db_postgres::PgStore;
pub use transport_redis::RedisTransport;
