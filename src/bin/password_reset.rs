//! Password-reset action packaged for the Lambda custom runtime

use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing_subscriber::EnvFilter;

use virtual_assistant::callback;
use virtual_assistant::domain::action::{ActionInvocation, ActionResponseEnvelope};

async fn function_handler(event: LambdaEvent<ActionInvocation>) -> Result<ActionResponseEnvelope, Error> {
    Ok(callback::handle(&event.payload))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // CloudWatch timestamps every line already
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_ansi(false)
        .with_target(false)
        .without_time()
        .init();

    run(service_fn(function_handler)).await
}
