//! A recorded response replayed against a cache: the initial payload, the increments streamed
//! into one of its lists and increments that arrive after the stream closed.

use std::convert::Infallible;

use anyhow::{anyhow, bail, Context};
use graphcache::{Cache, CacheKey, CacheWarning, IncrementOutcome, Selection, StreamSummary};
use serde_json::{Map, Value};

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    #[serde(default = "default_root")]
    pub root: String,
    pub initial: Value,
    pub stream: StreamTarget,
    #[serde(default)]
    pub increments: Vec<Value>,
    /// Delivered after the stream closed.
    #[serde(default)]
    pub late: Vec<Value>,
    /// `true` selects a field, an object selects a relation and its fields.
    #[serde(default)]
    pub read: Option<Map<String, Value>>,
}

fn default_root() -> String {
    String::from("Query")
}

#[derive(Debug, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct StreamTarget {
    /// Fields and list indices leading from the root to the parent record.
    pub path: Vec<PathSegment>,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum PathSegment {
    Index(usize),
    Field(String),
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct Report {
    pub stream: StreamSummary,
    pub late_dropped: usize,
    pub warnings: Vec<CacheWarning>,
    pub store: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<ReadReport>,
}

#[derive(Debug, serde::Serialize)]
pub(crate) struct ReadReport {
    pub partial: bool,
    pub data: Value,
}

impl Scenario {
    pub(crate) fn from_json(source: &str) -> anyhow::Result<Self> {
        serde_json::from_str(source).context("invalid scenario")
    }
}

pub(crate) async fn replay(config: &str, scenario: Scenario) -> anyhow::Result<Report> {
    let Scenario {
        root,
        initial,
        stream,
        increments,
        late,
        read,
    } = scenario;

    let mut cache = Cache::from_toml(config).context("invalid cache configuration")?;

    let root = cache.write_root(&root, initial)?;
    tracing::info!("Wrote the initial payload under {root}");

    let parent = resolve_path(&cache, &root, &stream.path)?;
    let handle = cache.open_stream(&parent, &stream.field)?;

    tracing::info!("Streaming {} increments into {parent}.{}", increments.len(), stream.field);

    let increments = futures::stream::iter(increments.into_iter().map(Ok::<_, Infallible>));
    let summary = cache.consume(handle, increments).await?;

    let mut late_dropped = 0;
    for increment in late {
        if cache.apply_increment(handle, increment)? == IncrementOutcome::Dropped {
            late_dropped += 1;
        }
    }

    let read = match read {
        Some(tree) => {
            let result = cache.read(&root, &selection(&tree)?);
            Some(ReadReport {
                partial: result.partial,
                data: result.data,
            })
        }
        None => None,
    };

    Ok(Report {
        stream: summary,
        late_dropped,
        warnings: cache.take_warnings(),
        store: cache.snapshot(),
        read,
    })
}

fn resolve_path(cache: &Cache, root: &CacheKey, path: &[PathSegment]) -> anyhow::Result<CacheKey> {
    let mut current = root.clone();
    let mut segments = path.iter().peekable();

    while let Some(segment) = segments.next() {
        let field = match segment {
            PathSegment::Field(field) => field,
            PathSegment::Index(index) => bail!("index {index} in the stream path must follow a list field"),
        };

        let record = cache
            .get(&current)
            .ok_or_else(|| anyhow!("nothing is stored under {current}"))?;

        current = match segments.next_if(|segment| matches!(segment, PathSegment::Index(_))) {
            Some(PathSegment::Index(index)) => record
                .children(field)
                .get(*index)
                .cloned()
                .ok_or_else(|| anyhow!("{current}.{field} has no child at {index}"))?,
            _ => record
                .link(field)
                .cloned()
                .ok_or_else(|| anyhow!("{current}.{field} does not link to a record"))?,
        };
    }

    Ok(current)
}

fn selection(tree: &Map<String, Value>) -> anyhow::Result<Selection> {
    tree.iter().try_fold(Selection::new(), |selection, (name, value)| match value {
        Value::Bool(true) => Ok(selection.field(name.as_str())),
        Value::Object(tree) => Ok(selection.object(name.as_str(), self::selection(tree)?)),
        _ => Err(anyhow!("{name} must be `true` or a nested selection")),
    })
}
