use aws_sdk_ssm::error::DisplayErrorContext;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use prime_bench_lambda::adapters::log_sink::StderrLogSink;
use prime_bench_lambda::adapters::parameter_store::ParameterStore;
use prime_bench_lambda::handlers::cold_start::ColdStartTracker;
use prime_bench_lambda::handlers::counter::{handle_invocation, HandlerConfig, InvocationContext};
use serde_json::Value;

struct SsmParameterStore {
    ssm_client: aws_sdk_ssm::Client,
}

impl ParameterStore for SsmParameterStore {
    fn get_parameter(&self, name: &str) -> Result<String, String> {
        let client = self.ssm_client.clone();
        let parameter_name = name.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .get_parameter()
                    .name(parameter_name)
                    .send()
                    .await
                    .map_err(|error| {
                        format!("failed to read ssm parameter: {}", DisplayErrorContext(&error))
                    })?;

                output
                    .parameter()
                    .and_then(|parameter| parameter.value())
                    .map(str::to_string)
                    .ok_or_else(|| "ssm parameter has no value".to_string())
            })
        })
    }
}

struct RuntimeDependencies {
    config: HandlerConfig,
    store: SsmParameterStore,
    cold_start: ColdStartTracker,
}

async fn handle_request(event: LambdaEvent<Value>, deps: &RuntimeDependencies) -> Result<(), Error> {
    let context = InvocationContext {
        request_id: event.context.request_id,
        cold_start: deps.cold_start.take(),
    };

    handle_invocation(&deps.config, &context, &deps.store, &StderrLogSink);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let deps = RuntimeDependencies {
        config: HandlerConfig::from_env(),
        store: SsmParameterStore {
            ssm_client: aws_sdk_ssm::Client::new(&aws_config),
        },
        cold_start: ColdStartTracker::from_env(),
    };

    let deps = &deps;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_request(event, deps).await
    }))
    .await
}
