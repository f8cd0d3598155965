//! # Domain Creation
//!
//! ACL-driven namespace setup on the remote side. Non-fatal: a failure here
//! is logged and the service continues posting entities without a domain
//! id.

use std::collections::BTreeSet;

use tracing::warn;

use crate::client::TimelineClient;
use crate::config::AclConfig;
use crate::entity::TimelineDomain;

/// Compute and register the domain for `application_id`, honoring the ACL
/// configuration. Returns `None` when ACLs are disabled, a predefined
/// domain id is configured, or `putDomain` fails.
pub async fn create_domain(
    config: &AclConfig,
    current_user: &str,
    application_id: &str,
    client: &dyn TimelineClient,
) -> Option<String> {
    if !config.enabled {
        return None;
    }
    if let Some(predefined) = &config.predefined_domain_id {
        return Some(predefined.clone());
    }

    let mut readers: BTreeSet<String> = BTreeSet::new();
    readers.insert(current_user.to_string());
    readers.extend(config.admin_acls.iter().cloned());
    readers.extend(config.modify_acls.iter().cloned());
    readers.extend(config.view_acls.iter().cloned());

    let mut writers: BTreeSet<String> = BTreeSet::new();
    writers.insert(current_user.to_string());
    writers.extend(config.admin_acls.iter().cloned());
    writers.extend(config.modify_acls.iter().cloned());

    let id = format!("Spark_ATS_{application_id}");
    let domain = TimelineDomain {
        id: id.clone(),
        readers: join_space(&readers),
        writers: join_space(&writers),
    };

    match client.put_domain(&domain).await {
        Ok(()) => Some(id),
        Err(err) => {
            warn!(error = %err, domain_id = %id, "domain setup failed, continuing without a domain id");
            None
        }
    }
}

fn join_space(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(" ")
}
