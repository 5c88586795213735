//! Postgres-backed store implementations. Each entity gets its own module,
//! mirroring the table it owns; every query is runtime-checked
//! (`sqlx::query_as::<_, T>`), never the `sqlx::query!` compile-time macro
//! family, since there is no `DATABASE_URL` available at build time here.

mod audit;
mod cursor;
mod message;
mod session;
mod thread;
mod trigger;

use sqlx::PgPool;

/// One pool, one struct implementing every store trait. Splitting into
/// five structs would just mean passing the same pool around five times.
#[derive(Clone)]
pub struct PostgresStore {
    pub pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}
