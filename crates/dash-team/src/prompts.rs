//! Prompt text for the supervisor and team members

use dash_agent::ToolSet;

use crate::policy::RoutingPolicy;
use crate::role::{FINISH, Role};

/// Generic instruction when the supervisor named no instructions
pub const PROCEED_INSTRUCTIONS: &str = "Please proceed with your expertise.";

/// Role prompt for a team member
pub fn member_prompt(role: Role) -> &'static str {
    match role {
        Role::DatabaseExpert => {
            "You are a database expert who can query PostgreSQL databases for information.\n\
             Always:\n\
             1. Check information_schema.columns once and reuse what you learn.\n\
             2. Return results as JSON: { \"sql\": \"...\", \"row_count\": <int>, \"rows\": [...] }"
        }
        Role::PythonExpert => {
            "You are a Python expert who can execute Python code to analyze data and solve problems."
        }
        Role::DataSummarizer => {
            "You are a data summarizer. Using the database results and analysis already in the \
             conversation, write a concise, direct answer to the human's question. Do not invent \
             numbers that are not in the conversation."
        }
    }
}

/// Short reinforcement of the role's scope
pub fn role_reinforcement(role: Role, tools: &ToolSet) -> String {
    let scope = match role {
        Role::DatabaseExpert => "DATABASE OPERATIONS ONLY.",
        Role::PythonExpert => "CODE EXECUTION ONLY.",
        Role::DataSummarizer => "SUMMARIZATION ONLY.",
    };
    if tools.is_empty() {
        format!("You are the {}. {}\nYou have no tools.", role, scope)
    } else {
        format!(
            "You are the {}. {}\nYour primary tools are: {}",
            role,
            scope,
            tools.names().join(", ")
        )
    }
}

/// Opening system message for a member turn
pub fn member_start(role: Role, prompt: &str, tools: &ToolSet) -> String {
    let tool_list = if tools.is_empty() {
        "(none)".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "{prompt}\n\n\
         YOU ARE THE {role}. Work autonomously using your specialized tools.\n\
         AVAILABLE TOOLS:\n{tool_list}\n\n\
         After using a tool, you'll receive results to use in your next step. \
         Your team members will handle their own specialized tasks."
    )
}

/// The supervisor's instructions, shown to the member after the transcript
pub fn member_instructions(instructions: &str) -> String {
    format!("Instructions from the supervisor:\n{}", instructions)
}

/// Closing system message for a member turn
pub fn member_end(role: Role, tools: &ToolSet) -> String {
    let allowed = if tools.is_empty() {
        "You have no tools; work only from the conversation".to_string()
    } else {
        format!("You can ONLY use these specific tools: {}", tools.names().join(", "))
    };
    format!(
        "CRITICAL REMINDERS:\n\
         1. You are the {role}\n\
         2. {allowed}\n\
         3. Complete your assigned task thoroughly before concluding\n\
         4. Clearly explain what you accomplished"
    )
}

/// Reply recorded when a member turn fails
pub fn member_failure(role: Role) -> String {
    format!(
        "As {}, I encountered an issue with tool execution. I recommend trying a different \
         approach or passing to another team member.",
        role
    )
}

/// Instruction used when the supervisor falls back to `role`
pub fn fallback_instructions(role: Role) -> &'static str {
    match role {
        Role::DatabaseExpert => "Please help with database operations.",
        Role::PythonExpert => "Please help with code execution.",
        Role::DataSummarizer => "Please summarize the findings so far.",
    }
}

fn options(roster: &[Role]) -> String {
    std::iter::once(FINISH)
        .chain(roster.iter().map(Role::name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Opening system message for the supervisor
pub fn supervisor_system(roster: &[Role], policy: &RoutingPolicy) -> String {
    let members = roster.iter().map(Role::name).collect::<Vec<_>>().join(", ");
    let mut prompt = format!(
        "You are a supervisor tasked with managing a conversation between the following \
         workers: {members}. Given the following user request, respond with the worker to act \
         next. Each worker will perform a task and respond with their results and status. \
         When finished, respond with {FINISH}.\n\n\
         Give clear instructions in points and choose strategically to minimize steps.\n\n"
    );

    let rules: Vec<String> = policy
        .rules_for(roster)
        .enumerate()
        .map(|(i, rule)| format!("{}. {}: {}", i + 1, rule.member, rule.description))
        .collect();
    if !rules.is_empty() {
        prompt.push_str("TEAM MEMBER SELECTION RULES:\n");
        prompt.push_str(&rules.join("\n"));
        prompt.push_str("\n\n");
    }

    prompt.push_str(&format!(
        "YOUR RESPONSE MUST BE IN THIS EXACT FORMAT:\n\
         REASONING: [your detailed reasoning]\n\
         NEXT: [one of: {}]\n\
         INSTRUCTIONS: [specific instructions for the selected team member]",
        options(roster)
    ));
    prompt
}

/// Closing system message for the supervisor
pub fn supervisor_closing(roster: &[Role]) -> String {
    format!(
        "After reviewing the conversation, select the next team member or {FINISH}.\n\
         Available options: {}\n\n\
         YOUR RESPONSE FORMAT MUST BE EXACTLY:\n\
         REASONING: [your reasoning]\n\
         NEXT: [expert name or {FINISH}]\n\
         INSTRUCTIONS: [specific instructions]",
        options(roster)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RoutingRule;

    #[test]
    fn test_supervisor_prompt_lists_roster_and_rules() {
        let roster = [Role::DatabaseExpert, Role::PythonExpert];
        let prompt = supervisor_system(&roster, &RoutingPolicy::default());
        assert!(prompt.contains("workers: DatabaseExpert, PythonExpert."));
        assert!(prompt.contains("TEAM MEMBER SELECTION RULES:\n1. DatabaseExpert:"));
        assert!(prompt.contains("2. PythonExpert:"));
        assert!(!prompt.contains("DataSummarizer"));
        assert!(prompt.contains("NEXT: [one of: FINISH, DatabaseExpert, PythonExpert]"));
    }

    #[test]
    fn test_supervisor_prompt_without_rules() {
        let policy = RoutingPolicy {
            rules: vec![RoutingRule {
                member: Role::DataSummarizer,
                description: "summaries".into(),
                keywords: vec![],
            }],
            preroute: false,
        };
        let prompt = supervisor_system(&[Role::DatabaseExpert], &policy);
        assert!(!prompt.contains("SELECTION RULES"));
    }

    #[test]
    fn test_member_framing_without_tools() {
        let tools = ToolSet::empty();
        let start = member_start(Role::DataSummarizer, member_prompt(Role::DataSummarizer), &tools);
        assert!(start.contains("YOU ARE THE DataSummarizer."));
        assert!(start.contains("AVAILABLE TOOLS:\n(none)"));
        assert!(member_end(Role::DataSummarizer, &tools).contains("You have no tools"));
    }

    #[test]
    fn test_failure_message_names_role() {
        let msg = member_failure(Role::PythonExpert);
        assert!(msg.starts_with("As PythonExpert, I encountered an issue"));
    }
}
