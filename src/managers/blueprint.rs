use crate::constants::blueprint::RESOURCE_SECTIONS;
use crate::errors::AirgapError;
use crate::managers::mirror::{is_resource_url, ResourceTree};

fn input_default<'a>(inputs: &'a ResourceTree, name: &str) -> Option<&'a ResourceTree> {
    inputs.get(name).and_then(|input| input.get("default"))
}

/// Collects the resources a manager blueprint needs from its `inputs`
/// section: the defaults of the well-known resource sections, then every
/// input whose default is an absolute URL. A blueprint without inputs yields
/// an empty mapping; missing sections are skipped.
pub fn resources_from_blueprint(blueprint: &ResourceTree) -> ResourceTree {
    let mut resources = ResourceTree::empty_mapping();
    let Some(inputs) = blueprint.get("inputs").filter(|inputs| inputs.is_mapping()) else {
        return resources;
    };
    for section in RESOURCE_SECTIONS {
        if let Some(default) = input_default(inputs, section) {
            resources.insert(*section, default.clone());
        }
    }
    for (name, input) in inputs.entries() {
        let Some(default) = input.get("default") else {
            continue;
        };
        if default.as_str().is_some_and(is_resource_url) {
            resources.insert(name.clone(), default.clone());
        }
    }
    resources
}

/// Replaces the top-level keys of `inputs` with those of `additional`.
pub fn merge_inputs(
    inputs: &mut ResourceTree,
    additional: &ResourceTree,
) -> Result<(), AirgapError> {
    if !inputs.is_mapping() {
        return Err(AirgapError::invalid_params(
            "Inputs document must be a mapping",
        ));
    }
    if !additional.is_mapping() {
        return Err(AirgapError::invalid_params(
            "Additional inputs must be a mapping",
        ));
    }
    for (key, value) in additional.entries() {
        inputs.insert(key.clone(), value.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{merge_inputs, resources_from_blueprint};
    use crate::managers::mirror::ResourceTree;

    const BLUEPRINT: &str = r#"
tosca_definitions_version: cloudify_dsl_1_2
inputs:
  agent_package_urls:
    default:
      centos_7x_agent: http://repo.example.com/agents/centos.tar.gz
  plugin_resources:
    default:
      - http://repo.example.com/plugins/openstack.wgn
  rest_service_module_source_url:
    default: https://github.com/org/rest/archive/3.3.tar.gz
  ssh_user:
    default: centos
  resources_prefix:
    type: string
"#;

    #[test]
    fn collects_sections_and_url_defaults() {
        let blueprint = ResourceTree::from_yaml_str(BLUEPRINT).expect("yaml");
        let resources = resources_from_blueprint(&blueprint);
        let keys: Vec<&str> = resources
            .entries()
            .iter()
            .map(|(key, _)| key.as_str())
            .collect();
        assert_eq!(
            keys,
            vec![
                "agent_package_urls",
                "plugin_resources",
                "rest_service_module_source_url"
            ]
        );
    }

    #[test]
    fn blueprint_without_inputs_yields_nothing() {
        let blueprint = ResourceTree::from_yaml_str("node_templates: {}\n").expect("yaml");
        assert!(resources_from_blueprint(&blueprint).is_empty());
    }

    #[test]
    fn merge_replaces_top_level_keys() {
        let mut inputs =
            ResourceTree::from_json_str(r#"{"a": 1, "b": {"x": 1}}"#).expect("json");
        let additional = ResourceTree::from_json_str(r#"{"b": {"y": 2}, "c": 3}"#).expect("json");
        merge_inputs(&mut inputs, &additional).expect("merge");
        assert_eq!(
            inputs.to_json_string().expect("json"),
            r#"{"a":1,"b":{"y":2},"c":3}"#
        );
    }
}
