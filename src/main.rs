use anyhow::Result;
use ocpp_swarm_sim::{run, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    run().await
}
