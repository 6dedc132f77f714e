//! Built-in tool descriptors.

use serde_json::json;

use super::{ToolDescriptor, GITHUB_REPO, JIRA_SEARCH, KNOWLEDGE_SEARCH, WEB_SCRAPE, WEB_SEARCH};

/// Look up the built-in descriptor for a tool identifier.
pub fn builtin_descriptor(id: &str) -> Option<ToolDescriptor> {
    let descriptor = match id {
        KNOWLEDGE_SEARCH => ToolDescriptor {
            id: KNOWLEDGE_SEARCH.to_string(),
            title: "Knowledge Search".to_string(),
            description: "Search the organisation's own documents and stored insights. \
                          Prefer this before searching the web."
                .to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to look for"},
                    "limit": {"type": "integer", "minimum": 1, "maximum": 20},
                    "matchThreshold": {"type": "number", "minimum": 0, "maximum": 1},
                    "useEmbeddings": {"type": "boolean"}
                },
                "required": ["query"]
            }),
            is_default: true,
        },
        WEB_SEARCH => ToolDescriptor {
            id: WEB_SEARCH.to_string(),
            title: "Web Search".to_string(),
            description: "Search the public web for current information, news and documentation."
                .to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Search query"}
                },
                "required": ["query"]
            }),
            is_default: true,
        },
        WEB_SCRAPE => ToolDescriptor {
            id: WEB_SCRAPE.to_string(),
            title: "Web Scraper".to_string(),
            description: "Fetch and extract the readable content of a web page.".to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Absolute URL to fetch"}
                },
                "required": ["url"]
            }),
            is_default: false,
        },
        GITHUB_REPO => ToolDescriptor {
            id: GITHUB_REPO.to_string(),
            title: "GitHub Repository".to_string(),
            description: "Inspect a GitHub repository: description, language, stars, forks, \
                          license, issues and recent activity."
                .to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["get_repo", "list_issues", "get_readme"]
                    },
                    "owner": {"type": "string"},
                    "repo": {"type": "string"}
                },
                "required": ["owner", "repo"]
            }),
            is_default: true,
        },
        JIRA_SEARCH => ToolDescriptor {
            id: JIRA_SEARCH.to_string(),
            title: "Jira Search".to_string(),
            description: "Search issues, tickets and sprints in the issue tracker.".to_string(),
            parameter_schema: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["search", "get_issue"]},
                    "query": {"type": "string"},
                    "issueKey": {"type": "string"}
                }
            }),
            is_default: true,
        },
        _ => return None,
    };

    Some(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::BUILTIN_TOOL_IDS;

    #[test]
    fn test_every_builtin_id_has_descriptor() {
        for id in BUILTIN_TOOL_IDS {
            let descriptor = builtin_descriptor(id).expect("descriptor");
            assert_eq!(descriptor.id, id);
            assert_eq!(descriptor.parameter_schema["type"], "object");
        }
    }

    #[test]
    fn test_unknown_id_has_no_descriptor() {
        assert!(builtin_descriptor("calendar").is_none());
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let descriptor = builtin_descriptor(KNOWLEDGE_SEARCH).unwrap();
        let json = serde_json::to_value(&descriptor).unwrap();
        assert!(json.get("parameterSchema").is_some());
        assert_eq!(json["isDefault"], true);
    }
}
