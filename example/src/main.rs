use tracing::{Instrument, trace_span};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod backend;
mod firebird;
mod mysql;
mod postgres;

type Result<T, E = Box<dyn std::error::Error>> = std::result::Result<T, E>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::Registry::default()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let engine = stmtwire::Engine::from_env();

    firebird::main(&engine).instrument(trace_span!("firebird")).await?;
    mysql::main(&engine).instrument(trace_span!("mysql")).await?;
    postgres::main(&engine).instrument(trace_span!("postgres")).await?;

    tracing::info!(connections = engine.registry().connection_count(), "done");

    Ok(())
}
