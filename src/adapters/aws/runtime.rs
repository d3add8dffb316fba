use async_trait::async_trait;
use aws_sdk_bedrockagentruntime::types::{
    InvocationInput, Observation, OrchestrationTrace, ResponseStream, Trace,
};
use tracing::debug;

use super::{classify, AwsCloud};
use crate::domain::error::CloudResult;
use crate::domain::ports::AgentRuntimePort;
use crate::domain::resources::{AgentCompletion, AgentTarget};

#[async_trait]
impl AgentRuntimePort for AwsCloud {
    async fn invoke_agent(
        &self,
        target: &AgentTarget,
        session_id: &str,
        question: &str,
        end_session: bool,
    ) -> CloudResult<AgentCompletion> {
        const OP: &str = "bedrock:InvokeAgent";
        let resource = format!("alias {} of {}", target.agent_alias_id, target.agent_id);

        let mut output = self
            .agent_runtime
            .invoke_agent()
            .agent_id(&target.agent_id)
            .agent_alias_id(&target.agent_alias_id)
            .session_id(session_id)
            .input_text(question)
            .end_session(end_session)
            .enable_trace(true)
            .send()
            .await
            .map_err(|e| classify(OP, &resource, e))?;

        let mut text = Vec::new();
        let mut trace = Vec::new();
        while let Some(event) = output
            .completion
            .recv()
            .await
            .map_err(|e| classify(OP, &resource, e))?
        {
            match event {
                ResponseStream::Chunk(part) => {
                    if let Some(bytes) = part.bytes() {
                        text.extend_from_slice(bytes.as_ref());
                    }
                }
                ResponseStream::Trace(part) => {
                    if let Some(event) = part.trace() {
                        trace.extend(trace_lines(event));
                    }
                }
                other => debug!(event = ?other, "ignoring agent stream event"),
            }
        }

        Ok(AgentCompletion {
            text: String::from_utf8_lossy(&text).into_owned(),
            trace,
        })
    }
}

/// Human-readable lines for one trace event. Only the agent's reasoning, the
/// calls it made and what came back are kept; model prompts and raw outputs
/// are dropped.
fn trace_lines(event: &Trace) -> Vec<String> {
    match event {
        Trace::OrchestrationTrace(step) => match step {
            OrchestrationTrace::Rationale(rationale) => rationale
                .text()
                .map(|text| format!("Rationale: {text}"))
                .into_iter()
                .collect(),
            OrchestrationTrace::InvocationInput(input) => invocation_lines(input),
            OrchestrationTrace::Observation(observation) => observation_lines(observation),
            other => {
                debug!(step = ?other, "skipping orchestration trace step");
                Vec::new()
            }
        },
        Trace::FailureTrace(failure) => vec![format!(
            "Failure: {}",
            failure.failure_reason().unwrap_or("unknown reason")
        )],
        other => {
            debug!(trace = ?other, "skipping agent trace event");
            Vec::new()
        }
    }
}

fn invocation_lines(input: &InvocationInput) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(call) = input.action_group_invocation_input() {
        let line = format!(
            "Invoking {} {} {}",
            call.action_group_name().unwrap_or("action group"),
            call.verb().unwrap_or_default().to_uppercase(),
            call.api_path().unwrap_or_default()
        );
        lines.push(line.trim_end().to_string());
    }
    if let Some(lookup) = input.knowledge_base_lookup_input() {
        lines.push(format!(
            "Searching knowledge base: {}",
            lookup.text().unwrap_or_default()
        ));
    }
    lines
}

fn observation_lines(observation: &Observation) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(output) = observation.action_group_invocation_output() {
        lines.push(format!("Action result: {}", output.text().unwrap_or_default()));
    }
    if let Some(output) = observation.knowledge_base_lookup_output() {
        lines.push(format!(
            "Knowledge base returned {} reference(s)",
            output.retrieved_references().len()
        ));
    }
    if let Some(answer) = observation.final_response() {
        lines.push(format!("Final response: {}", answer.text().unwrap_or_default()));
    }
    lines
}
