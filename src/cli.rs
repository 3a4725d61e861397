//! Helpers for binaries embedding a [`System`]: list what is configured and
//! run promotions by hand.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, bail};
use clap::Args;
use glu_common::PromotionStatus;

use crate::core::{PhaseFilter, System};
use crate::edges::KIND_PROMOTION;

#[derive(Debug, Clone, Default, Args)]
pub struct InspectArgs {
    /// Pipeline to inspect. Lists every pipeline when omitted.
    pub pipeline: Option<String>,

    /// Phase within the pipeline.
    pub phase: Option<String>,

    /// Only show phases carrying this label (repeatable)
    #[arg(short, long = "label", value_name = "KEY=VALUE", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,
}

#[derive(Debug, Clone, Args)]
pub struct PromoteArgs {
    pub pipeline: String,

    /// Target phase. Every matching edge is performed when omitted.
    pub phase: Option<String>,

    /// Edge kind to perform
    #[arg(long, default_value = KIND_PROMOTION)]
    pub kind: String,

    /// Only promote into phases carrying this label (repeatable)
    #[arg(short, long = "label", value_name = "KEY=VALUE", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid label {s:?}, expected KEY=VALUE")),
    }
}

fn filter(phase: Option<&str>, labels: &[(String, String)]) -> PhaseFilter {
    let mut filter =
        PhaseFilter::new().has_all_labels(labels.iter().cloned().collect::<BTreeMap<_, _>>());
    if let Some(name) = phase {
        filter = filter.named(name);
    }
    filter
}

/// Print pipelines, the phases of one pipeline, or a single phase.
pub async fn run_inspect<W: Write>(system: &System, args: &InspectArgs, out: &mut W) -> anyhow::Result<()> {
    let Some(pipeline_name) = &args.pipeline else {
        writeln!(out, "{:<24} {:>6} {:>6}", "NAME", "PHASES", "EDGES")?;
        for (name, pipeline) in system.pipelines() {
            writeln!(
                out,
                "{:<24} {:>6} {:>6}",
                name,
                pipeline.phases(PhaseFilter::new()).count(),
                pipeline.edges(None).count()
            )?;
        }
        return Ok(());
    };

    let pipeline = system.pipeline(pipeline_name)?;
    if let Some(phase_name) = &args.phase {
        let phase = pipeline.phase_by_name(phase_name)?;
        let descriptor = phase.descriptor();
        let resource = phase
            .get()
            .await
            .with_context(|| format!("Failed to read phase {descriptor}"))?;

        writeln!(out, "Name:     {}", descriptor.name())?;
        writeln!(out, "Kind:     {}", descriptor.kind)?;
        writeln!(out, "Pipeline: {}", descriptor.pipeline)?;
        writeln!(out, "Digest:   {}", resource.digest()?)?;
        for (key, value) in &descriptor.metadata.labels {
            writeln!(out, "Label:    {key}={value}")?;
        }
        for (key, value) in &descriptor.metadata.annotations {
            writeln!(out, "Annotation: {key}={value}")?;
        }
        for (field, value) in resource.printer_fields() {
            writeln!(out, "{field}: {value}")?;
        }
        let edges: Vec<_> = pipeline
            .edges_from(descriptor.name())
            .map(|edge| format!("{} -> {}", edge.kind(), edge.to().name()))
            .collect();
        if !edges.is_empty() {
            writeln!(out, "Edges:    {}", edges.join(", "))?;
        }
        return Ok(());
    }

    let mut rows = Vec::new();
    let mut extra_headers: Vec<String> = Vec::new();
    for phase in pipeline.phases(filter(None, &args.labels)) {
        let descriptor = phase.descriptor();
        let (digest, fields) = match phase.get().await {
            Ok(resource) => (resource.digest()?, resource.printer_fields()),
            Err(e) => {
                tracing::warn!(phase = %descriptor, error = %e, "failed to read phase");
                ("<error>".to_string(), Vec::new())
            }
        };
        for (header, _) in &fields {
            if !extra_headers.contains(header) {
                extra_headers.push(header.clone());
            }
        }
        rows.push((descriptor, digest, fields));
    }

    write!(out, "{:<20} {:<6} {:<20}", "NAME", "KIND", "DIGEST")?;
    for header in &extra_headers {
        write!(out, " {header}")?;
    }
    writeln!(out)?;
    for (descriptor, digest, fields) in rows {
        write!(out, "{:<20} {:<6} {:<20}", descriptor.name(), descriptor.kind, digest)?;
        for header in &extra_headers {
            let value = fields
                .iter()
                .find(|(field, _)| field == header)
                .map_or("", |(_, value)| value.as_str());
            write!(out, " {value}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Perform every edge of `args.kind` leading into the selected phases.
///
/// Stops at the first failing edge.
pub async fn run_promote<W: Write>(system: &System, args: &PromoteArgs, out: &mut W) -> anyhow::Result<()> {
    let pipeline = system.pipeline(&args.pipeline)?;
    let targets = filter(args.phase.as_deref(), &args.labels);

    let mut performed = 0;
    for edge in pipeline.edges(Some(&args.kind)) {
        let to = pipeline.phase_by_name(edge.to().name())?;
        if !targets.matches(&to) {
            continue;
        }
        let from = edge.from();
        let result = edge
            .perform()
            .await
            .with_context(|| format!("Failed to promote {} to {}", from, edge.to()))?;
        performed += 1;

        let status = match result.status {
            PromotionStatus::Updated => "updated",
            PromotionStatus::Proposed => "proposed",
            PromotionStatus::NoChange => "no change",
            PromotionStatus::Skipped => "skipped",
        };
        writeln!(out, "{} -> {}: {status}", from.name(), edge.to().name())?;
        for (key, value) in &result.annotations {
            writeln!(out, "  {key}: {value}")?;
        }
    }

    if performed == 0 {
        bail!(
            "no {} edges lead into {} in pipeline {}",
            args.kind,
            args.phase.as_deref().unwrap_or("any phase"),
            args.pipeline
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use glu_common::{Descriptor, Metadata, PromotionResult, State};
    use serde::Serialize;

    use crate::core::{Edge, Phase, Pipeline, Resource};
    use crate::errors::{Error, Result};

    #[derive(Serialize)]
    struct Tag(String);

    impl Resource for Tag {
        fn digest(&self) -> Result<String> {
            Ok(self.0.clone())
        }

        fn printer_fields(&self) -> Vec<(String, String)> {
            vec![("TAG".into(), self.0.clone())]
        }
    }

    struct Fixed {
        descriptor: Descriptor,
        tag: &'static str,
    }

    #[async_trait]
    impl Phase for Fixed {
        fn descriptor(&self) -> Descriptor {
            self.descriptor.clone()
        }

        async fn get(&self) -> Result<Box<dyn Resource>> {
            Ok(Box::new(Tag(self.tag.into())))
        }

        async fn history(&self) -> Result<Vec<State>> {
            Ok(Vec::new())
        }
    }

    struct Counting {
        from: Descriptor,
        to: Descriptor,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Edge for Counting {
        fn kind(&self) -> &str {
            KIND_PROMOTION
        }

        fn from(&self) -> Descriptor {
            self.from.clone()
        }

        fn to(&self) -> Descriptor {
            self.to.clone()
        }

        async fn perform(&self) -> Result<PromotionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PromotionResult::updated(
                [("dev.getglu.git.head.sha".to_string(), "abc".to_string())].into(),
            ))
        }
    }

    fn phase(name: &str, tag: &'static str) -> Arc<Fixed> {
        Arc::new(Fixed {
            descriptor: Descriptor::new(
                "test",
                "checkout",
                Metadata::new(name).with_label("env", name),
            ),
            tag,
        })
    }

    fn system() -> (System, Arc<Counting>) {
        let staging = phase("staging", "v2");
        let production = phase("production", "v1");
        let edge = Arc::new(Counting {
            from: staging.descriptor(),
            to: production.descriptor(),
            calls: AtomicUsize::new(0),
        });

        let mut pipeline = Pipeline::new(Metadata::new("checkout"));
        pipeline.add_phase(staging).unwrap();
        pipeline.add_phase(production).unwrap();
        pipeline.add_edge(edge.clone()).unwrap();

        let mut system = System::new();
        system.add_pipeline(pipeline).unwrap();
        (system, edge)
    }

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("env=prod").unwrap(), ("env".into(), "prod".into()));
        assert!(parse_label("env").is_err());
        assert!(parse_label("=prod").is_err());
    }

    #[tokio::test]
    async fn test_inspect_lists_pipelines() {
        let (system, _) = system();
        let mut out = Vec::new();
        run_inspect(&system, &InspectArgs::default(), &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("NAME"));
        assert!(out.lines().nth(1).unwrap().starts_with("checkout"));
    }

    #[tokio::test]
    async fn test_inspect_phases_with_printer_fields() {
        let (system, _) = system();
        let args = InspectArgs {
            pipeline: Some("checkout".into()),
            ..Default::default()
        };
        let mut out = Vec::new();
        run_inspect(&system, &args, &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].ends_with(" TAG"));
        // phases come back ordered by name
        assert!(lines[1].starts_with("production"));
        assert!(lines[1].ends_with(" v1"));
        assert!(lines[2].starts_with("staging"));
    }

    #[tokio::test]
    async fn test_inspect_single_phase() {
        let (system, _) = system();
        let args = InspectArgs {
            pipeline: Some("checkout".into()),
            phase: Some("staging".into()),
            ..Default::default()
        };
        let mut out = Vec::new();
        run_inspect(&system, &args, &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Digest:   v2"));
        assert!(out.contains("TAG: v2"));
        assert!(out.contains("Edges:    promotion -> production"));
    }

    #[tokio::test]
    async fn test_inspect_unknown_pipeline() {
        let (system, _) = system();
        let args = InspectArgs {
            pipeline: Some("billing".into()),
            ..Default::default()
        };
        let err = run_inspect(&system, &args, &mut Vec::new()).await.unwrap_err();
        assert!(err.downcast_ref::<Error>().is_some_and(Error::is_not_found));
    }

    #[tokio::test]
    async fn test_promote_into_phase() {
        let (system, edge) = system();
        let args = PromoteArgs {
            pipeline: "checkout".into(),
            phase: Some("production".into()),
            kind: KIND_PROMOTION.into(),
            labels: Vec::new(),
        };
        let mut out = Vec::new();
        run_promote(&system, &args, &mut out).await.unwrap();
        assert_eq!(edge.calls.load(Ordering::SeqCst), 1);
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("staging -> production: updated"));
    }

    #[tokio::test]
    async fn test_promote_without_matching_edge_fails() {
        let (system, edge) = system();
        let args = PromoteArgs {
            pipeline: "checkout".into(),
            phase: Some("staging".into()),
            kind: KIND_PROMOTION.into(),
            labels: Vec::new(),
        };
        assert!(run_promote(&system, &args, &mut Vec::new()).await.is_err());
        assert_eq!(edge.calls.load(Ordering::SeqCst), 0);
    }
}
