//! CLI command implementations

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use grove_core::{Element, ElementKind, ModelManager, SourceAttributes};
use grove_indexer::FooStructureBuilder;
use grove_watcher::{DeltaStream, FsWorkspace, WorkspaceWatcher};
use serde::Serialize;

use crate::config::GroveConfig;

struct Session {
    workspace: Arc<FsWorkspace>,
    manager: Arc<ModelManager>,
}

impl Session {
    fn open(root: &Path, config: GroveConfig) -> anyhow::Result<Self> {
        let workspace = Arc::new(FsWorkspace::open(root, config.workspace)?);
        let builder = Arc::new(FooStructureBuilder::new(config.indexer));
        let manager = ModelManager::startup(workspace.clone(), builder, config.model)?;
        Ok(Session { workspace, manager })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.manager.shutdown();
    }
}

pub fn tree(root: &Path, config: GroveConfig, attributes: bool) -> anyhow::Result<()> {
    let session = Session::open(root, config)?;
    print!("{}", render_tree(&session.manager, attributes)?);
    Ok(())
}

fn render_tree(manager: &ModelManager, attributes: bool) -> anyhow::Result<String> {
    let mut out = String::new();
    for project in manager.projects()? {
        writeln!(out, "{}", project.name())?;
        for file in manager.files(&project)? {
            writeln!(out, "  {}", file.name())?;
            // A file that fails to parse does not hide the rest of the tree.
            let children = match manager.children(&file) {
                Ok(children) => children,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", file, e);
                    continue;
                }
            };
            for child in children {
                write!(out, "    {}", describe(manager, &child)?)?;
                if attributes
                    && let Some(attrs) = manager.attributes(&child)?
                {
                    write!(out, "  {}", describe_ranges(&attrs))?;
                }
                out.push('\n');
            }
        }
    }
    Ok(out)
}

fn describe(manager: &ModelManager, element: &Element) -> anyhow::Result<String> {
    let mut text = match element.kind() {
        ElementKind::Var => format!("var {}", element.name()),
        ElementKind::Def => format!(
            "def {}({})",
            element.name(),
            manager.parameter_names(element)?.join(", ")
        ),
        _ => element.name().to_string(),
    };
    if element.occurrence() > 1 {
        write!(text, " #{}", element.occurrence())?;
    }
    Ok(text)
}

fn describe_ranges(attrs: &SourceAttributes) -> String {
    let range = |r: Option<grove_core::TextRange>| {
        r.map(|r| format!("{}..{}", r.offset, r.end()))
            .unwrap_or_else(|| "-".to_string())
    };
    format!(
        "[{}] name [{}]",
        range(attrs.full_range),
        range(attrs.identifying_range)
    )
}

#[derive(Serialize)]
struct Inspection {
    file: Element,
    attributes: Option<SourceAttributes>,
    children: Vec<ChildReport>,
}

#[derive(Serialize)]
struct ChildReport {
    element: Element,
    kind: ElementKind,
    attributes: Option<SourceAttributes>,
}

pub fn inspect(root: &Path, config: GroveConfig, target: &str) -> anyhow::Result<()> {
    let (project, name) = target
        .split_once('/')
        .with_context(|| format!("Expected <project>/<file>, got '{target}'"))?;
    let file = Element::project(project)?.file(name)?;

    let session = Session::open(root, config)?;
    let manager = &session.manager;
    let mut children = Vec::new();
    for child in manager.children(&file)? {
        children.push(ChildReport {
            kind: child.kind(),
            attributes: manager.attributes(&child)?,
            element: child,
        });
    }
    let inspection = Inspection {
        attributes: manager.attributes(&file)?,
        file,
        children,
    };
    println!("{}", serde_json::to_string_pretty(&inspection)?);
    Ok(())
}

pub async fn watch(root: &Path, config: GroveConfig, json: bool) -> anyhow::Result<()> {
    let session = Session::open(root, config)?;
    tracing::info!("Model has {} projects", session.manager.projects()?.len());

    let mut stream = DeltaStream::attach(&session.manager);
    let watcher = WorkspaceWatcher::start(session.workspace.clone())?;

    loop {
        tokio::select! {
            event = stream.recv() => {
                let Some(event) = event else { break };
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    println!(
                        "{} {:?}\n{}",
                        event.timestamp.format("%H:%M:%S%.3f"),
                        event.kind,
                        event.delta
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    watcher.stop().await;
    Ok(())
}
