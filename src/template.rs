//! Role-pattern token expansion and prompt rendering.

use std::path::Path;

use minijinja::{Environment, context};
use serde::Serialize;

use crate::workspace::{Role, RoleIdentity};

const INITIAL_PROMPT_TEMPLATE: &str = include_str!("templates/initial-prompt.md.jinja");
const STARTUP_BEACON_TEMPLATE: &str = include_str!("templates/startup-beacon.md.jinja");
const PROPULSION_TEMPLATE: &str = include_str!("templates/propulsion.md.jinja");

/// Errors from role-pattern expansion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown token {{{token}}} in {pattern:?}")]
    UnknownToken { token: String, pattern: String },

    #[error("unterminated token at byte {offset} in {pattern:?}")]
    Unterminated { offset: usize, pattern: String },
}

/// Values for the fixed token set `{town}`, `{rig}`, `{name}`, `{role}`.
#[derive(Debug, Clone, Default)]
pub struct TokenValues {
    pub town: String,
    pub rig: String,
    pub name: String,
    pub role: String,
}

impl TokenValues {
    pub fn for_identity(id: &RoleIdentity, town_root: &Path) -> Self {
        Self {
            town: town_root.display().to_string(),
            rig: id.rig().to_string(),
            name: id.name().unwrap_or_default().to_string(),
            role: id.role().as_str().to_string(),
        }
    }

    fn get(&self, token: &str) -> Option<&str> {
        match token {
            "town" => Some(&self.town),
            "rig" => Some(&self.rig),
            "name" => Some(&self.name),
            "role" => Some(&self.role),
            _ => None,
        }
    }
}

/// Expand `{token}` references. `{{` and `}}` are literal braces.
pub fn expand_role_pattern(pattern: &str, values: &TokenValues) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(pattern.len());
    let mut rest = pattern;
    let mut offset = 0;

    while let Some(idx) = rest.find(['{', '}']) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];

        if tail.starts_with("{{") || tail.starts_with("}}") {
            out.push_str(&tail[..1]);
            rest = &tail[2..];
            offset += idx + 2;
            continue;
        }
        if tail.starts_with('}') {
            // A lone closing brace is literal text.
            out.push('}');
            rest = &tail[1..];
            offset += idx + 1;
            continue;
        }

        let Some(end) = tail.find('}') else {
            return Err(TemplateError::Unterminated {
                offset: offset + idx,
                pattern: pattern.to_string(),
            });
        };
        let token = &tail[1..end];
        let value = values
            .get(token)
            .ok_or_else(|| TemplateError::UnknownToken {
                token: token.to_string(),
                pattern: pattern.to_string(),
            })?;
        out.push_str(value);
        rest = &tail[end + 1..];
        offset += idx + end + 1;
    }
    out.push_str(rest);
    Ok(out)
}

fn render(name: &str, source: &str, ctx: impl Serialize) -> anyhow::Result<String> {
    let mut env = Environment::new();
    env.add_template(name, source)?;
    let rendered = env.get_template(name)?.render(ctx)?;
    Ok(rendered)
}

fn title(role: Role) -> &'static str {
    match role {
        Role::Witness => "Witness",
        Role::Polecat => "Polecat",
        Role::Refinery => "Refinery",
        Role::Deacon => "Deacon",
        Role::Mayor => "Mayor",
        Role::Crew => "Crew",
    }
}

/// Patrol roles loop on a molecule; the rest pick work off their hook.
const fn is_patrol_role(role: Role) -> bool {
    matches!(role, Role::Witness | Role::Refinery | Role::Deacon)
}

/// First prompt handed to a freshly launched agent.
pub fn render_initial_prompt(id: &RoleIdentity) -> anyhow::Result<String> {
    let rig = if id.role().is_town_level() {
        ""
    } else {
        id.rig()
    };
    render(
        "initial-prompt",
        INITIAL_PROMPT_TEMPLATE,
        context! {
            title => title(id.role()),
            role => id.role().as_str(),
            rig => rig,
            patrol => is_patrol_role(id.role()),
        },
    )
}

/// Beacon sent right after startup so the agent can find its predecessor.
pub fn render_startup_beacon(
    recipient: &str,
    sender: &str,
    topic: &str,
    timestamp: &str,
) -> anyhow::Result<String> {
    render(
        "startup-beacon",
        STARTUP_BEACON_TEMPLATE,
        context! {
            recipient => recipient,
            sender => sender,
            topic => topic,
            timestamp => timestamp,
            resume => true,
        },
    )
}

/// The nudge that starts the role's autonomous work loop.
pub fn render_propulsion(role: Role, work_dir: &Path) -> anyhow::Result<String> {
    render(
        "propulsion",
        PROPULSION_TEMPLATE,
        context! {
            patrol => is_patrol_role(role),
            work_dir => work_dir.display().to_string(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values() -> TokenValues {
        TokenValues {
            town: "/town".into(),
            rig: "demo".into(),
            name: "capable".into(),
            role: "polecat".into(),
        }
    }

    #[test]
    fn expands_all_tokens() {
        let out = expand_role_pattern("cd {town}/{rig}/polecats/{name} && gt {role}", &values())
            .unwrap();
        assert_eq!(out, "cd /town/demo/polecats/capable && gt polecat");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(expand_role_pattern("claude --resume", &values()).unwrap(), "claude --resume");
    }

    #[test]
    fn doubled_braces_are_literal() {
        let out = expand_role_pattern("awk '{{print $1}}' {rig}", &values()).unwrap();
        assert_eq!(out, "awk '{print $1}' demo");
    }

    #[test]
    fn unknown_token_is_an_error() {
        let err = expand_role_pattern("run {rgi}", &values()).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownToken { ref token, .. } if token == "rgi"));
    }

    #[test]
    fn unterminated_token_is_an_error() {
        let err = expand_role_pattern("run {rig", &values()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unterminated {
                offset: 4,
                pattern: "run {rig".into()
            }
        );
    }

    #[test]
    fn initial_prompt_names_role_and_rig() {
        let id = RoleIdentity::new(Role::Witness, "demo", None).unwrap();
        let prompt = render_initial_prompt(&id).unwrap();
        assert_eq!(
            prompt,
            "I am Witness for demo. Start patrol: check gt hook, if empty create mol-witness-patrol wisp and execute it."
        );
    }

    #[test]
    fn initial_prompt_for_worker_checks_hook() {
        let id = RoleIdentity::new(Role::Polecat, "demo", Some("capable")).unwrap();
        let prompt = render_initial_prompt(&id).unwrap();
        assert!(prompt.starts_with("I am Polecat for demo."));
        assert!(prompt.contains("Check gt hook"));
        assert!(!prompt.contains("patrol"));
    }

    #[test]
    fn beacon_contains_routing() {
        let beacon = render_startup_beacon("demo/witness", "deacon", "patrol", "2026-01-02T03:04").unwrap();
        assert!(beacon.starts_with("[GAS TOWN] demo/witness <- deacon • 2026-01-02T03:04 • patrol"));
        assert!(beacon.contains("/resume"));
    }

    #[test]
    fn propulsion_differs_by_role() {
        let patrol = render_propulsion(Role::Witness, Path::new("/w")).unwrap();
        assert!(patrol.contains("patrol molecule"));
        let worker = render_propulsion(Role::Polecat, Path::new("/w")).unwrap();
        assert!(worker.contains("gt hook"));
        assert!(worker.ends_with("(cwd: /w)"));
    }
}
