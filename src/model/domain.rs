//! Typed views over the domain layout of a configuration tree
//!
//! The tree itself is generic; these helpers know where server groups, hosts,
//! server configs and profiles live and how their settings inherit.

use crate::model::address::*;
use crate::model::resource::Resource;
use serde_json::Value;
use std::collections::BTreeSet;

pub const GROUP: &str = "group";
pub const PROFILE_ATTR: &str = "profile";
pub const INCLUDES: &str = "includes";
pub const SOCKET_BINDING_GROUP_ATTR: &str = "socket-binding-group";
pub const PORT_OFFSET: &str = "socket-binding-port-offset";
pub const AUTO_START: &str = "auto-start";

/// A server-config entry on a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfigView {
    pub name: String,
    pub group: String,
}

pub fn host<'a>(root: &'a Resource, host: &str) -> Option<&'a Resource> {
    root.child(HOST, host)
}

pub fn server_config<'a>(root: &'a Resource, host_name: &str, server: &str) -> Option<&'a Resource> {
    host(root, host_name)?.child(SERVER_CONFIG, server)
}

pub fn server_group<'a>(root: &'a Resource, group: &str) -> Option<&'a Resource> {
    root.child(SERVER_GROUP, group)
}

/// Every server-config defined on `host`
pub fn server_configs(root: &Resource, host_name: &str) -> Vec<ServerConfigView> {
    host(root, host_name)
        .map(|h| {
            h.children_of(SERVER_CONFIG)
                .map(|(name, sc)| ServerConfigView {
                    name: name.clone(),
                    group: sc.attribute_str(GROUP).unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Profiles whose subsystems a group's workers run: the group's profile plus
/// every profile it includes, transitively. `None` when the group or its profile
/// attribute is missing, or an include names a profile that does not exist.
pub fn profile_set(root: &Resource, group: &str) -> Option<Vec<String>> {
    let profile = server_group(root, group)?.attribute_str(PROFILE_ATTR)?;
    let mut ordered = Vec::new();
    let mut seen = BTreeSet::new();
    collect_profiles(root, profile, &mut ordered, &mut seen)?;
    Some(ordered)
}

fn collect_profiles(
    root: &Resource,
    name: &str,
    ordered: &mut Vec<String>,
    seen: &mut BTreeSet<String>,
) -> Option<()> {
    if !seen.insert(name.to_string()) {
        return Some(());
    }
    let profile = root.child(PROFILE, name)?;
    if let Some(Value::Array(includes)) = profile.attribute(INCLUDES) {
        for inc in includes.iter().filter_map(Value::as_str) {
            collect_profiles(root, inc, ordered, seen)?;
        }
    }
    ordered.push(name.to_string());
    Some(())
}

/// Socket binding group a server uses: its own, or its group's
pub fn effective_socket_binding_group(
    root: &Resource,
    host_name: &str,
    server: &str,
) -> Option<String> {
    let sc = server_config(root, host_name, server)?;
    if let Some(sbg) = sc.attribute_str(SOCKET_BINDING_GROUP_ATTR) {
        return Some(sbg.to_string());
    }
    let group = sc.attribute_str(GROUP)?;
    server_group(root, group)?
        .attribute_str(SOCKET_BINDING_GROUP_ATTR)
        .map(str::to_string)
}

/// Scopes a setting may be defined at, broadest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Scope {
    Domain,
    Group,
    Host,
    Server,
}

/// The resource defining `kind=name` at `scope` for a given server, if any
pub fn definition_at<'a>(
    root: &'a Resource,
    scope: Scope,
    host_name: &str,
    group: &str,
    server: &str,
    kind: &str,
    name: &str,
) -> Option<&'a Resource> {
    match scope {
        Scope::Domain => root.child(kind, name),
        Scope::Group => server_group(root, group)?.child(kind, name),
        Scope::Host => host(root, host_name)?.child(kind, name),
        Scope::Server => server_config(root, host_name, server)?.child(kind, name),
    }
}

/// Scopes at which `kind` can be defined
pub fn scopes_for(kind: &str) -> &'static [Scope] {
    match kind {
        SYSTEM_PROPERTY => &[Scope::Domain, Scope::Group, Scope::Host, Scope::Server],
        PATH | INTERFACE => &[Scope::Domain, Scope::Host, Scope::Server],
        JVM => &[Scope::Group, Scope::Host, Scope::Server],
        _ => &[Scope::Domain],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn domain() -> Resource {
        Resource::new()
            .with_child("profile", "base", Resource::new())
            .with_child(
                "profile",
                "full",
                Resource::new().with_attribute(INCLUDES, json!(["base"])),
            )
            .with_child(
                "server-group",
                "g1",
                Resource::new()
                    .with_attribute(PROFILE_ATTR, "full")
                    .with_attribute(SOCKET_BINDING_GROUP_ATTR, "standard"),
            )
            .with_child("server-group", "g2", Resource::new())
            .with_child(
                "host",
                "a",
                Resource::new()
                    .with_child(
                        "server-config",
                        "s1",
                        Resource::new().with_attribute(GROUP, "g1"),
                    )
                    .with_child(
                        "server-config",
                        "s2",
                        Resource::new()
                            .with_attribute(GROUP, "g1")
                            .with_attribute(SOCKET_BINDING_GROUP_ATTR, "other"),
                    ),
            )
    }

    #[test]
    fn test_profile_set_follows_includes() {
        let root = domain();
        assert_eq!(profile_set(&root, "g1"), Some(vec!["base".into(), "full".into()]));
        assert_eq!(profile_set(&root, "g2"), None);
        assert_eq!(profile_set(&root, "missing"), None);
    }

    #[test]
    fn test_profile_set_tolerates_cycles() {
        let root = Resource::new()
            .with_child("profile", "a", Resource::new().with_attribute(INCLUDES, json!(["b"])))
            .with_child("profile", "b", Resource::new().with_attribute(INCLUDES, json!(["a"])))
            .with_child("server-group", "g", Resource::new().with_attribute(PROFILE_ATTR, "a"));
        assert_eq!(profile_set(&root, "g"), Some(vec!["b".into(), "a".into()]));
    }

    #[test]
    fn test_effective_socket_binding_group() {
        let root = domain();
        assert_eq!(
            effective_socket_binding_group(&root, "a", "s1").as_deref(),
            Some("standard")
        );
        assert_eq!(
            effective_socket_binding_group(&root, "a", "s2").as_deref(),
            Some("other")
        );
    }

    #[test]
    fn test_server_configs() {
        let configs = server_configs(&domain(), "a");
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].group, "g1");
        assert!(server_configs(&domain(), "nope").is_empty());
    }
}
