#![allow(unused_crate_dependencies, clippy::panic)]

use graphcache::{Cache, CacheKey, CacheWarning, IncrementOutcome, Selection, StreamState};
use rstest::rstest;
use serde_json::json;

const CONFIG: &str = include_str!("fixtures/episode-media.toml");

fn episode_parent(cache: &mut Cache) -> CacheKey {
    cache.write_entity("Episode", json!({ "uri": "scannarr:" })).unwrap()
}

fn handle(uri: &str, media: &str) -> serde_json::Value {
    json!({ "uri": uri, "media": { "uri": media } })
}

fn children(cache: &Cache, key: &CacheKey, field: &str) -> Vec<String> {
    cache
        .get(key)
        .unwrap()
        .children(field)
        .iter()
        .map(ToString::to_string)
        .collect()
}

#[test]
fn streamed_handles_rekey_the_episode_and_its_media() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    let first = cache.apply_increment(stream, handle("2", "12")).unwrap();
    assert_eq!(
        first,
        IncrementOutcome::Applied {
            parent: CacheKey::new("Episode", "scannarr:(2)"),
            children: 1
        }
    );

    let second = cache.apply_increment(stream, handle("3", "13")).unwrap();
    assert_eq!(
        second,
        IncrementOutcome::Applied {
            parent: CacheKey::new("Episode", "scannarr:(2,3)"),
            children: 2
        }
    );

    cache.close(stream).unwrap();

    insta::assert_json_snapshot!(cache.snapshot(), @r###"
    {
      "Episode:scannarr:(2,3)": {
        "uri": "scannarr:",
        "handles": [
          "Episode:2",
          "Episode:3"
        ],
        "media": "Media:scannarr:(12,13)"
      },
      "Media:12": {
        "uri": "12"
      },
      "Episode:2": {
        "uri": "2",
        "media": "Media:12"
      },
      "Media:scannarr:(12,13)": {
        "handles": [
          "Media:12",
          "Media:13"
        ]
      },
      "Media:13": {
        "uri": "13"
      },
      "Episode:3": {
        "uri": "3",
        "media": "Media:13"
      }
    }
    "###);

    let selection = Selection::new()
        .field("uri")
        .object("media", Selection::new().field("uri").object("handles", Selection::new().field("uri")))
        .object(
            "handles",
            Selection::new()
                .field("uri")
                .object("media", Selection::new().field("uri")),
        );

    let result = cache.read(cache.stream_parent(stream).unwrap(), &selection);

    assert!(!result.partial);
    insta::assert_json_snapshot!(result.data, @r###"
    {
      "uri": "scannarr:(2,3)",
      "media": {
        "uri": "scannarr:(12,13)",
        "handles": {
          "edges": [
            {
              "node": {
                "uri": "12"
              }
            },
            {
              "node": {
                "uri": "13"
              }
            }
          ]
        }
      },
      "handles": {
        "edges": [
          {
            "node": {
              "uri": "2",
              "media": {
                "uri": "12"
              }
            }
          },
          {
            "node": {
              "uri": "3",
              "media": {
                "uri": "13"
              }
            }
          }
        ]
      }
    }
    "###);
}

#[test]
fn each_increment_is_a_complete_write() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    for (received, (uri, media)) in [("2", "12"), ("3", "13"), ("4", "14")].into_iter().enumerate() {
        let IncrementOutcome::Applied { parent, children } = cache.apply_increment(stream, handle(uri, media)).unwrap()
        else {
            panic!("the stream is still open");
        };

        let media = cache.get(&parent).and_then(|record| record.link("media")).cloned().unwrap();

        assert_eq!(children, received + 1);
        assert_eq!(cache.get(&media).unwrap().children("handles").len(), children);
        assert_eq!(cache.derive_key(&parent).unwrap(), Some(parent.clone()));
        assert_eq!(cache.derive_key(&media).unwrap(), Some(media.clone()));
        assert_eq!(
            cache.stream_state(stream).unwrap(),
            StreamState::Accumulating { received: received + 1 }
        );
    }
}

#[test]
fn increments_after_close_are_dropped() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    cache.apply_increment(stream, handle("2", "12")).unwrap();
    cache.apply_increment(stream, handle("3", "13")).unwrap();
    cache.close(stream).unwrap();

    let late = cache.apply_increment(stream, handle("4", "14")).unwrap();
    let parent = CacheKey::new("Episode", "scannarr:(2,3)");

    assert_eq!(late, IncrementOutcome::Dropped);
    assert_eq!(children(&cache, &parent, "handles"), ["Episode:2", "Episode:3"]);
    assert!(!cache.store().contains(&CacheKey::new("Episode", "4")));
    assert_eq!(
        cache.warnings(),
        [CacheWarning::LateIncrement {
            parent,
            field: "handles".into()
        }]
    );
}

#[rstest]
#[case::in_order(&[("2", "12"), ("3", "13")])]
#[case::reversed(&[("3", "13"), ("2", "12")])]
fn composite_keys_ignore_arrival_order(#[case] increments: &[(&str, &str)]) {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    for (uri, media) in increments {
        cache.apply_increment(stream, handle(uri, media)).unwrap();
    }

    let parent = cache.stream_parent(stream).unwrap().clone();
    let media = cache.get(&parent).and_then(|record| record.link("media")).cloned();

    assert_eq!(parent, CacheKey::new("Episode", "scannarr:(2,3)"));
    assert_eq!(media, Some(CacheKey::new("Media", "scannarr:(12,13)")));
}

#[test]
fn arrival_ordering_keeps_the_order_children_came_in() {
    let config = CONFIG.replace(
        r#"prefix = "scannarr:" }"#,
        r#"prefix = "scannarr:", ordering = "arrival" }"#,
    );

    let mut cache = Cache::from_toml(&config).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    cache.apply_increment(stream, handle("3", "13")).unwrap();
    cache.apply_increment(stream, handle("2", "12")).unwrap();

    let parent = cache.stream_parent(stream).unwrap();
    assert_eq!(parent, &CacheKey::new("Episode", "scannarr:(3,2)"));
    assert_eq!(
        cache.get(parent).and_then(|record| record.link("media")),
        Some(&CacheKey::new("Media", "scannarr:(13,12)"))
    );
}

#[test]
fn sync_is_idempotent() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    cache.apply_increment(stream, handle("2", "12")).unwrap();
    cache.apply_increment(stream, handle("3", "13")).unwrap();

    let parent = cache.stream_parent(stream).unwrap().clone();
    let before = cache.snapshot();
    let mut events = cache.subscribe();

    let first = cache.sync(&parent, "handles", "media").unwrap();
    let second = cache.sync(&parent, "handles", "media").unwrap();

    assert_eq!(first, Some(CacheKey::new("Media", "scannarr:(12,13)")));
    assert_eq!(first, second);
    assert_eq!(cache.snapshot(), before);
    assert!(events.try_recv().is_err(), "a repeated sync must not notify");
}

#[test]
fn sync_of_an_unregistered_relation_fails() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);

    let error = cache.sync(&parent, "handles", "cover").unwrap_err();

    assert_eq!(
        error.to_string(),
        "no derived relation Episode.cover is registered over handles"
    );
}

#[test]
fn projection_misses_shorten_the_derived_list() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    cache
        .apply_increment(stream, json!({ "uri": "2", "media": null }))
        .unwrap();
    cache.apply_increment(stream, handle("3", "13")).unwrap();

    let parent = cache.stream_parent(stream).unwrap().clone();
    let media = cache.get(&parent).and_then(|record| record.link("media")).cloned().unwrap();

    assert_eq!(parent, CacheKey::new("Episode", "scannarr:(2,3)"));
    assert_eq!(media, CacheKey::new("Media", "scannarr:(13)"));
    assert_eq!(children(&cache, &media, "handles"), ["Media:13"]);
}

#[test]
fn rekey_onto_an_existing_record_merges_and_warns() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();

    let existing = cache
        .write_entity("Episode", json!({ "uri": "scannarr:(2)", "title": "cached" }))
        .unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    let outcome = cache.apply_increment(stream, handle("2", "12")).unwrap();

    assert_eq!(
        outcome,
        IncrementOutcome::Applied {
            parent: existing.clone(),
            children: 1
        }
    );
    assert!(!cache.store().contains(&parent));

    let record = cache.get(&existing).unwrap();
    assert_eq!(record.scalar("title"), Some(&json!("cached")));
    assert_eq!(record.children("handles"), [CacheKey::new("Episode", "2")]);

    assert!(cache.warnings().contains(&CacheWarning::RekeyConflict {
        from: parent,
        to: existing
    }));
}

#[test]
fn rekeying_preserves_back_references() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();

    let query = cache
        .write_root(
            "Query",
            json!({ "Page": { "episode": [{ "uri": "scannarr:", "handles": { "edges": [] } }] } }),
        )
        .unwrap();
    let page = CacheKey::new("Page", "Query.Page");
    let parent = CacheKey::new("Episode", "scannarr:");

    assert_eq!(query, CacheKey::root("Query"));
    assert_eq!(children(&cache, &page, "episode"), ["Episode:scannarr:"]);

    let stream = cache.open_stream(&parent, "handles").unwrap();
    cache.apply_increment(stream, handle("2", "12")).unwrap();

    assert_eq!(children(&cache, &page, "episode"), ["Episode:scannarr:(2)"]);
    assert_eq!(
        cache.stream_parent(stream).unwrap(),
        &CacheKey::new("Episode", "scannarr:(2)")
    );
}

#[test]
fn subscribers_see_every_mutation_in_order() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();
    let mut receiver = cache.subscribe();

    cache.apply_increment(stream, handle("2", "12")).unwrap();

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }

    insta::assert_json_snapshot!(events, @r###"
    [
      {
        "kind": "written",
        "key": "Media:12",
        "fields": [
          "uri"
        ]
      },
      {
        "kind": "written",
        "key": "Episode:2",
        "fields": [
          "uri",
          "media"
        ]
      },
      {
        "kind": "written",
        "key": "Episode:scannarr:",
        "fields": [
          "handles"
        ]
      },
      {
        "kind": "rekeyed",
        "from": "Episode:scannarr:",
        "to": "Episode:scannarr:(2)"
      },
      {
        "kind": "written",
        "key": "Media:scannarr:(2)",
        "fields": []
      },
      {
        "kind": "written",
        "key": "Episode:scannarr:(2)",
        "fields": [
          "media"
        ]
      },
      {
        "kind": "written",
        "key": "Media:scannarr:(2)",
        "fields": [
          "handles"
        ]
      },
      {
        "kind": "rekeyed",
        "from": "Media:scannarr:(2)",
        "to": "Media:scannarr:(12)"
      },
      {
        "kind": "written",
        "key": "Episode:scannarr:(2)",
        "fields": [
          "media"
        ]
      }
    ]
    "###);
}

#[test]
fn increments_must_be_objects() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    let error = cache.apply_increment(stream, json!(["2"])).unwrap_err();

    assert_eq!(error.to_string(), "Episode.handles expected an object, got a list");
    assert_eq!(cache.stream_state(stream).unwrap(), StreamState::Empty);
}

#[test]
fn streams_only_open_over_children_relations() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);

    let error = cache.open_stream(&parent, "media").unwrap_err();

    assert_eq!(error.to_string(), "Episode.media is not a children relation");
}

#[test]
fn streamed_edges_are_unwrapped_on_connections() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    let outcome = cache
        .apply_increment(stream, json!({ "node": { "uri": "2", "media": { "uri": "12" } } }))
        .unwrap();

    assert_eq!(
        outcome,
        IncrementOutcome::Applied {
            parent: CacheKey::new("Episode", "scannarr:(2)"),
            children: 1
        }
    );
    assert!(cache.store().contains(&CacheKey::new("Media", "scannarr:(12)")));
}

#[test]
fn streamed_child_without_identity_gets_an_indexed_placeholder() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    let outcome = cache
        .apply_increment(stream, json!({ "media": { "uri": "12" } }))
        .unwrap();

    let placeholder = CacheKey::new("Episode", "Episode:scannarr:.handles.0");
    let parent = CacheKey::new("Episode", "scannarr:(Episode:scannarr:.handles.0)");

    assert_eq!(
        outcome,
        IncrementOutcome::Applied {
            parent: parent.clone(),
            children: 1
        }
    );
    assert_eq!(
        cache.warnings(),
        [CacheWarning::MissingIdentity {
            typename: "Episode".into(),
            location: "Episode:scannarr:.handles.0".into(),
            placeholder: placeholder.clone(),
        }]
    );
    assert_eq!(children(&cache, &parent, "handles"), [placeholder.to_string()]);
    assert_eq!(
        cache.get(&placeholder).and_then(|record| record.link("media")),
        Some(&CacheKey::new("Media", "12"))
    );
    assert_eq!(
        cache.get(&parent).and_then(|record| record.link("media")),
        Some(&CacheKey::new("Media", "scannarr:(12)"))
    );
}

#[test]
fn rekeying_a_child_re_derives_the_parents_built_from_it() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    cache.apply_increment(stream, handle("2", "12")).unwrap();
    cache.apply_increment(stream, handle("3", "13")).unwrap();

    // A leaf handle that turns out to have handles of its own.
    let child = cache
        .on_field_resolved(
            &CacheKey::new("Episode", "2"),
            "handles",
            json!({ "edges": [{ "node": { "uri": "5" } }] }),
        )
        .unwrap();

    assert_eq!(child, CacheKey::new("Episode", "scannarr:(5)"));

    let parent = cache.stream_parent(stream).unwrap().clone();

    assert_eq!(parent, CacheKey::new("Episode", "scannarr:(3,scannarr:(5))"));
    assert_eq!(cache.derive_key(&parent).unwrap(), Some(parent.clone()));
    assert_eq!(
        children(&cache, &parent, "handles"),
        ["Episode:scannarr:(5)", "Episode:3"]
    );
    assert!(!cache.store().contains(&CacheKey::new("Episode", "scannarr:(2,3)")));
}

#[test]
fn explicit_rekeys_re_derive_the_parents_too() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();

    cache.apply_increment(stream, handle("2", "12")).unwrap();
    cache.apply_increment(stream, handle("3", "13")).unwrap();

    cache
        .rekey(&CacheKey::new("Episode", "2"), &CacheKey::new("Episode", "7"))
        .unwrap();

    let parent = cache.stream_parent(stream).unwrap().clone();

    assert_eq!(parent, CacheKey::new("Episode", "scannarr:(3,7)"));
    assert_eq!(children(&cache, &parent, "handles"), ["Episode:7", "Episode:3"]);
    assert!(cache.store().contains(&parent));
}

#[test]
fn a_failed_increment_leaves_no_trace() {
    let mut cache = Cache::from_toml(CONFIG).unwrap();
    let parent = episode_parent(&mut cache);
    let stream = cache.open_stream(&parent, "handles").unwrap();
    let before = cache.snapshot();
    let mut events = cache.subscribe();

    // `media` is normalized before `handles` is found to be malformed.
    let error = cache
        .apply_increment(stream, json!({ "uri": "2", "media": { "uri": "12" }, "handles": 7 }))
        .unwrap_err();

    assert_eq!(error.to_string(), "Episode.handles expected a list, got a number");
    assert_eq!(cache.snapshot(), before);
    assert!(!cache.store().contains(&CacheKey::new("Media", "12")));
    assert_eq!(cache.stream_state(stream).unwrap(), StreamState::Empty);
    assert_eq!(cache.stream_parent(stream).unwrap(), &parent);
    assert!(cache.warnings().is_empty());

    cache.write_entity("Media", json!({ "uri": "99" })).unwrap();

    let mut published = Vec::new();
    while let Ok(event) = events.try_recv() {
        published.push(event);
    }

    insta::assert_json_snapshot!(published, @r###"
    [
      {
        "kind": "written",
        "key": "Media:99",
        "fields": [
          "uri"
        ]
      }
    ]
    "###);
}
