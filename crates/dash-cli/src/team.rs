//! Assembles the research team from configuration

use std::collections::HashMap;
use std::sync::Arc;

use dash_agent::{Agent, AgentConfig, RunConfig, ToolSet, Transport};
use dash_ai::{Model, Provider};
use dash_team::{GraphConfig, Member, ResearchDriver, ResearchGraph, Role, Supervisor};

use crate::config::{Config, ModelSettings};

fn provider_for(base_url: &str) -> Provider {
    if base_url.contains("openrouter.ai") {
        Provider::OpenRouter
    } else if base_url.contains("api.openai.com") {
        Provider::OpenAI
    } else {
        Provider::Custom
    }
}

/// Model and sampling settings for one node
pub fn run_config(config: &Config, settings: &ModelSettings) -> RunConfig {
    let provider = &config.provider;
    let mut model = Model::new(provider_for(&provider.base_url), settings.id.clone())
        .with_base_url(provider.base_url.clone());
    if let Some(referer) = &provider.referer {
        model = model.with_header("HTTP-Referer", referer.clone());
    }
    if let Some(title) = &provider.title {
        model = model.with_header("X-Title", title.clone());
    }

    let mut run = RunConfig::new(model);
    if let Some(temperature) = settings.temperature {
        run = run.with_temperature(temperature);
    }
    if let Some(max_tokens) = settings.max_tokens {
        run = run.with_max_tokens(max_tokens);
    }
    run
}

/// Build the graph and driver. Roles without configured tools get an empty
/// tool set.
pub fn build_driver(
    config: &Config,
    transport: Arc<dyn Transport>,
    tools: &HashMap<Role, ToolSet>,
) -> dash_team::Result<ResearchDriver> {
    let members = config
        .graph
        .team
        .iter()
        .map(|&role| {
            let agent_config = AgentConfig {
                name: role.name().to_string(),
                run: run_config(config, config.models.for_role(role)),
                max_tool_rounds: config.graph.max_tool_rounds,
            };
            let role_tools = tools.get(&role).cloned().unwrap_or_default();
            tracing::debug!(role = %role, tools = ?role_tools, "Registering team member");
            Member::new(role, Agent::new(agent_config, role_tools, transport.clone()))
        })
        .collect();

    let supervisor = Supervisor::new(transport.clone(), run_config(config, &config.models.supervisor))
        .with_policy(config.routing_policy())
        .with_fallback(config.graph.fallback_member);

    let graph = ResearchGraph::new(
        supervisor,
        members,
        GraphConfig {
            roster: config.graph.team.clone(),
            recursion_limit: config.graph.recursion_limit,
        },
    )?;
    tracing::info!(roster = ?graph.roster(), recursion_limit = graph.recursion_limit(), "Research graph ready");

    Ok(ResearchDriver::new(Arc::new(graph), config.graph.default_question.clone()))
}
