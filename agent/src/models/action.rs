//! Server-directed actions

use ddi_models::{BaseResource, Link};
use url::Url;

use crate::errors::AgentError;

/// One unit of work advertised by the base resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send the target attributes
    Identify,

    /// Install the deployment `id`; `resource` is the `c` query token
    Deploy { id: String, resource: String },

    /// Cancel the action `id`
    Cancel { id: String },
}

impl Action {
    /// Actions advertised by `base`, in the order they are handled
    pub fn from_base(base: &BaseResource) -> Result<Vec<Action>, AgentError> {
        let links = base.links();
        let mut actions = Vec::new();

        if links.config_data.is_some() {
            actions.push(Action::Identify);
        }
        if let Some(link) = &links.deployment_base {
            actions.push(Action::deploy(link)?);
        }
        if let Some(link) = &links.cancel_action {
            actions.push(Action::Cancel {
                id: segment_after(link, "cancelAction")?,
            });
        }

        Ok(actions)
    }

    /// Parse a `.../deploymentBase/{id}?c={resource}` link
    pub fn deploy(link: &Link) -> Result<Action, AgentError> {
        let id = segment_after(link, "deploymentBase")?;
        let url = Url::parse(&link.href)?;
        let resource = url
            .query_pairs()
            .find(|(key, _)| key == "c")
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| {
                AgentError::ProtocolError(format!("no resource token in {}", link.href))
            })?;

        Ok(Action::Deploy { id, resource })
    }
}

fn segment_after(link: &Link, marker: &str) -> Result<String, AgentError> {
    let url = Url::parse(&link.href)?;
    let mut segments = url
        .path_segments()
        .ok_or_else(|| AgentError::ProtocolError(format!("unexpected link {}", link.href)))?;

    segments
        .by_ref()
        .find(|segment| *segment == marker)
        .and_then(|_| segments.next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AgentError::ProtocolError(format!("no action id in {}", link.href)))
}
