//! Default mutators: newline normalisation, Mustache templating, and a
//! Helm-to-Argo CD sync-hook rewrite.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize as _;
use serde_yaml::{Mapping, Value};

use super::Mutator;
use crate::model::{AttributeValue, Request};

/// Ensures a file ends with a newline character. A no-op on empty input.
pub struct NewlineEofMutator;

#[async_trait]
impl Mutator for NewlineEofMutator {
    fn title(&self) -> &str {
        "New Line EOF"
    }

    async fn mutate(&self, _request: &Request, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        if input.last() == Some(&b'\n') {
            return Ok(input.to_vec());
        }
        let mut out = input.to_vec();
        out.push(b'\n');
        Ok(out)
    }
}

/// Renders the file as a Mustache template against the request's
/// `metadata` attribute tree.
pub struct MustacheMutator;

fn attribute_value_to_mustache_data(value: &AttributeValue) -> mustache::Data {
    match value {
        AttributeValue::Null => mustache::Data::Null,
        AttributeValue::Bool(b) => mustache::Data::Bool(*b),
        AttributeValue::Number(n) => mustache::Data::String(format_number(*n)),
        AttributeValue::String(s) => mustache::Data::String(s.clone()),
        AttributeValue::Array(values) => {
            mustache::Data::VecVal(values.iter().map(attribute_value_to_mustache_data).collect())
        }
        AttributeValue::Object(fields) => mustache::Data::Map(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), attribute_value_to_mustache_data(v)))
                .collect::<HashMap<_, _>>(),
        ),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[async_trait]
impl Mutator for MustacheMutator {
    fn title(&self) -> &str {
        "Mustache template"
    }

    async fn mutate(&self, request: &Request, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let source = std::str::from_utf8(input)?;
        let template = mustache::compile_str(source)
            .map_err(|err| anyhow::anyhow!("failed to compile mustache template: {err}"))?;
        let data = attribute_value_to_mustache_data(&request.metadata);

        let mut rendered = Vec::new();
        template
            .render_data(&mut rendered, &data)
            .map_err(|err| anyhow::anyhow!("failed to render mustache template: {err}"))?;
        Ok(rendered)
    }
}

/// Converts Helm release hooks to their equivalent Argo CD sync hooks.
/// Written directly against `serde_yaml::Value` rather than a bespoke
/// YAML node-manipulation helper.
pub struct HelmHooksToArgoCdMutator;

const HELM_TO_ARGOCD_HOOK: &[(&str, &str)] = &[
    ("crd-install", "PreSync"),
    ("pre-install", "PreSync"),
    ("pre-upgrade", "PreSync"),
    ("post-upgrade", "PostSync"),
    ("post-install", "PostSync"),
    ("post-delete", "PostDelete"),
];

fn get_or_create_mapping<'a>(parent: &'a mut Mapping, key: &str) -> &'a mut Mapping {
    let key_value = Value::String(key.to_string());
    if !parent.contains_key(&key_value) {
        parent.insert(key_value.clone(), Value::Mapping(Mapping::new()));
    }
    parent
        .get_mut(&key_value)
        .and_then(Value::as_mapping_mut)
        .expect("just inserted or pre-existing mapping")
}

fn convert_helm_hooks(annotations: &mut Mapping) {
    let hook_key = Value::String("helm.sh/hook".to_string());
    let Some(hook_value) = annotations.get(&hook_key).and_then(Value::as_str) else {
        return;
    };

    let Some((_, argocd_hook)) = HELM_TO_ARGOCD_HOOK.iter().find(|(helm, _)| *helm == hook_value)
    else {
        return;
    };

    annotations.insert(
        Value::String("argocd.argoproj.io/hook".to_string()),
        Value::String((*argocd_hook).to_string()),
    );
    annotations.remove(&hook_key);
}

#[async_trait]
impl Mutator for HelmHooksToArgoCdMutator {
    fn title(&self) -> &str {
        "Helm Hooks to Argo CD sync hooks"
    }

    async fn mutate(&self, _request: &Request, input: &[u8]) -> anyhow::Result<Vec<u8>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        let source = std::str::from_utf8(input)?;
        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_str(source) {
            let mut value = Value::deserialize(document)?;
            if let Some(mapping) = value.as_mapping_mut() {
                let metadata = get_or_create_mapping(mapping, "metadata");
                let annotations = get_or_create_mapping(metadata, "annotations");
                convert_helm_hooks(annotations);
            }
            documents.push(value);
        }

        let mut rendered = String::new();
        for (index, document) in documents.iter().enumerate() {
            if index > 0 {
                rendered.push_str("---\n");
            }
            rendered.push_str(&serde_yaml::to_string(document)?);
        }
        Ok(rendered.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Repository;

    fn request_with_metadata(metadata: AttributeValue) -> Request {
        Request {
            target_repository: Repository::new("https://example.com/repo.git"),
            environment: "dev".into(),
            update_identifier: "feature-x".into(),
            app_name: "web".into(),
            dry_run: true,
            auto_review: false,
            source: None,
            paths: Default::default(),
            total_files: 0,
            metadata,
        }
    }

    #[tokio::test]
    async fn newline_eof_noop_on_empty_input() {
        let mutator = NewlineEofMutator;
        let out = mutator.mutate(&request_with_metadata(Default::default()), b"").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn newline_eof_appends_missing_newline() {
        let mutator = NewlineEofMutator;
        let out = mutator
            .mutate(&request_with_metadata(Default::default()), b"hello")
            .await
            .unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[tokio::test]
    async fn newline_eof_leaves_trailing_newline_alone() {
        let mutator = NewlineEofMutator;
        let out = mutator
            .mutate(&request_with_metadata(Default::default()), b"hello\n")
            .await
            .unwrap();
        assert_eq!(out, b"hello\n");
    }

    #[tokio::test]
    async fn mustache_renders_against_request_metadata() {
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("app".to_string(), AttributeValue::String("web".to_string()));
        let request = request_with_metadata(AttributeValue::Object(fields));

        let mutator = MustacheMutator;
        let out = mutator
            .mutate(&request, b"replicas-for-{{app}}")
            .await
            .unwrap();
        assert_eq!(out, b"replicas-for-web");
    }

    #[tokio::test]
    async fn helm_hooks_are_converted_to_argocd_hooks() {
        let mutator = HelmHooksToArgoCdMutator;
        let input = b"metadata:\n  annotations:\n    helm.sh/hook: pre-install\n";
        let out = mutator
            .mutate(&request_with_metadata(Default::default()), input)
            .await
            .unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("argocd.argoproj.io/hook: PreSync"));
        assert!(!rendered.contains("helm.sh/hook"));
    }

    #[tokio::test]
    async fn unmapped_hooks_are_left_untouched() {
        let mutator = HelmHooksToArgoCdMutator;
        let input = b"metadata:\n  annotations:\n    helm.sh/hook: test\n";
        let out = mutator
            .mutate(&request_with_metadata(Default::default()), input)
            .await
            .unwrap();
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("helm.sh/hook: test"));
    }
}
