//! The standard task catalog, derived from the configured targets and patches.

use crate::config::ProvisionConfig;
use crate::error::Result;
use crate::tasks::graph::{TaskGraph, TaskNode};

pub const GET_ARCHIVE: &str = "get-archive";
pub const EXTRACT: &str = "extract";
pub const STATUS: &str = "status";
pub const RESET_STAGING: &str = "reset-staging";
pub const RESET_ALL: &str = "reset-all";

/// What a task does when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    FetchArchive,
    Extract,
    /// Make sure the patch with this id is applied.
    Patch(String),
    /// Make sure the patch with this id is not applied.
    Unpatch(String),
    /// Render the templates of these patches for a variant.
    Configure { variant: String, patches: Vec<String> },
    Status,
    ResetStaging,
    ResetAll,
}

pub fn patch_task(patch_id: &str) -> String {
    format!("patch-{patch_id}")
}

pub fn unpatch_task(patch_id: &str) -> String {
    format!("unpatch-{patch_id}")
}

pub fn configure_task(variant: &str) -> String {
    format!("configure-{variant}")
}

/// Builds and validates the catalog for `config`.
pub fn build_catalog(config: &ProvisionConfig) -> Result<TaskGraph<Step>> {
    let mut graph = TaskGraph::new();

    graph.add(TaskNode::new(
        GET_ARCHIVE,
        format!("download '{}' if absent", config.archive.file_name),
        Step::FetchArchive,
    ))?;
    graph.add(
        TaskNode::new(
            EXTRACT,
            format!("unpack into '{}' if absent", config.archive.dir_name),
            Step::Extract,
        )
        .after(GET_ARCHIVE),
    )?;

    for patch in &config.patches {
        let id = patch.id();
        let what = match &patch.variant {
            Some(variant) => format!("'{variant}' patch of target '{}'", patch.target),
            None => format!("patch of target '{}'", patch.target),
        };
        graph.add(
            TaskNode::new(patch_task(&id), format!("apply the {what}"), Step::Patch(id.clone()))
                .after(EXTRACT),
        )?;
        graph.add(TaskNode::new(
            unpatch_task(&id),
            format!("revert the {what}"),
            Step::Unpatch(id),
        ))?;
    }

    for variant in config.variants() {
        let patches: Vec<String> = config
            .patches_for_variant(&variant)
            .iter()
            .map(|p| p.id())
            .collect();
        let templated = config
            .patches_for_variant(&variant)
            .iter()
            .any(|p| p.template.is_some());
        let description = if templated {
            format!("configure all targets for '{variant}' networking and render credentials")
        } else {
            format!("configure all targets for '{variant}' networking")
        };

        let mut node = TaskNode::new(
            configure_task(&variant),
            description,
            Step::Configure {
                variant: variant.clone(),
                patches: patches.clone(),
            },
        );
        for id in &patches {
            node = node.after(patch_task(id));
        }
        graph.add(node)?;
    }

    graph.add(TaskNode::new(
        STATUS,
        "show archive, staging and patch state",
        Step::Status,
    ))?;
    graph.add(TaskNode::new(
        RESET_STAGING,
        "delete the staging tree",
        Step::ResetStaging,
    ))?;
    graph.add(TaskNode::new(
        RESET_ALL,
        "delete the staging tree and the archive",
        Step::ResetAll,
    ))?;

    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use std::path::Path;

    fn catalog() -> TaskGraph<Step> {
        let config = ProvisionConfig::from_toml_str(
            Path::new("/repo"),
            Path::new("/repo/provision.toml"),
            SAMPLE,
        )
        .unwrap();
        build_catalog(&config).unwrap()
    }

    #[test]
    fn catalog_exposes_cli_task_names() {
        let graph = catalog();
        let names = graph.names();
        for expected in [
            "get-archive",
            "extract",
            "patch-main",
            "unpatch-main",
            "patch-camera-ap",
            "unpatch-camera-ap",
            "patch-camera-router",
            "unpatch-camera-router",
            "configure-ap",
            "configure-router",
            "status",
            "reset-staging",
            "reset-all",
        ] {
            assert!(names.contains(&expected), "missing task {expected}");
        }
    }

    #[test]
    fn configure_router_plan_matches_pipeline_order() {
        let graph = catalog();
        let plan: Vec<&str> = graph
            .plan("configure-router")
            .unwrap()
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert_eq!(
            plan,
            vec![
                "get-archive",
                "extract",
                "patch-main",
                "patch-camera-router",
                "configure-router"
            ]
        );
        assert_eq!(
            graph.get("configure-router").map(|n| n.action.clone()),
            Some(Step::Configure {
                variant: "router".to_string(),
                patches: vec!["main".to_string(), "camera-router".to_string()],
            })
        );
    }

    #[test]
    fn unpatch_and_reset_have_no_prerequisites() {
        let graph = catalog();
        for name in ["unpatch-main", "reset-staging", "reset-all", "status"] {
            let plan = graph.plan(name).unwrap();
            assert_eq!(plan.len(), 1, "{name} should run alone");
        }
    }
}
