//! End-to-end check runs against in-memory collaborators

mod helper;

use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;

use external_data_checker::check::Status;
use external_data_checker::manifest::Locator;
use external_data_checker::orchestrator::{GraphError, RunOptions};
use external_data_checker::remote::digest;

use helper::{
    FakeFetcher, FakeGit, create_orchestrator, create_orchestrator_with, json_manifest, options,
    yaml_manifest,
};

#[tokio::test]
async fn rotating_url_with_stripped_query_reports_update() {
    let manifest = json_manifest(
        r#"[{
            "type": "archive",
            "url": "http://e.com/v1.0.0.tar.gz?id=9",
            "sha256": "0000000000000000000000000000000000000000000000000000000000000000",
            "x-checker-data": {
                "type": "rotating-url",
                "pattern": "v([\\d.]+)\\.tar\\.gz",
                "strip-query": true
            }
        }]"#,
    );
    let fetcher = FakeFetcher::new()
        .with_redirect("http://e.com/v1.0.0.tar.gz?id=9", "http://e.com/v1.1.0.tar.gz?id=9")
        .with_page("http://e.com/v1.1.0.tar.gz", "release 1.1.0");
    let options = RunOptions {
        complete_digests: true,
        ..options()
    };

    let report = create_orchestrator(fetcher, FakeGit::new(), options)
        .run(&manifest)
        .await
        .unwrap();

    let state = &report.states[0];
    assert_eq!(state.status, Status::Updatable);
    let new = state.new.as_ref().unwrap();
    assert_eq!(new.version.as_deref(), Some("1.1.0"));
    assert_eq!(
        new.locator,
        Locator::Url {
            url: "http://e.com/v1.1.0.tar.gz".into()
        }
    );
    assert_eq!(new.digests, digest::hash(b"release 1.1.0").digests);
    assert_eq!(report.outcome(), Status::Updatable);
}

#[tokio::test]
async fn git_tag_pattern_respects_constraints() {
    let manifest = yaml_manifest(
        r#"
id: org.example.App
modules:
  - name: lib
    sources:
      - type: git
        url: https://git.e.com/lib.git
        tag: v1.0.0
        commit: c100
        x-checker-data:
          type: git
          tag-pattern: ^v([\d.]+)$
          versions:
            "<": "2.1.0"
"#,
    );
    let git = FakeGit::new().with_refs(
        "https://git.e.com/lib.git",
        &[
            ("refs/heads/main", "c999"),
            ("refs/tags/v1.0.0", "c100"),
            ("refs/tags/v2.0.0", "c200"),
            ("refs/tags/v2.1.0", "c210"),
        ],
    );

    let report = create_orchestrator(FakeFetcher::new(), git, options())
        .run(&manifest)
        .await
        .unwrap();

    let state = &report.states[0];
    assert_eq!(state.name(), "lib/lib");
    assert_eq!(state.status, Status::Updatable);
    assert_eq!(
        state.new.as_ref().unwrap().locator,
        Locator::Git {
            url: "https://git.e.com/lib.git".into(),
            branch: None,
            tag: Some("v2.0.0".into()),
            commit: Some("c200".into()),
        }
    );
}

#[rstest]
#[case(true, "2.0.0")]
#[case(false, "1.0.0")]
#[tokio::test]
async fn html_sort_matches_decides_between_greatest_and_first(
    #[case] sort_matches: bool,
    #[case] expected: &str,
) {
    let manifest = json_manifest(&format!(
        r#"[{{
            "type": "file",
            "url": "https://e.com/dl/tool-0.9.0.tar.gz",
            "sha256": "aa",
            "x-checker-data": {{
                "type": "html",
                "url": "https://e.com/releases",
                "version-pattern": "tool-([\\d.]+)\\.tar\\.gz",
                "url-template": "https://e.com/dl/tool-$version.tar.gz",
                "sort-matches": {sort_matches}
            }}
        }}]"#
    ));
    let fetcher = FakeFetcher::new().with_page(
        "https://e.com/releases",
        r#"<a href="tool-1.0.0.tar.gz">1.0.0</a> <a href="tool-2.0.0.tar.gz">2.0.0</a>"#,
    );

    let report = create_orchestrator(fetcher, FakeGit::new(), options())
        .run(&manifest)
        .await
        .unwrap();

    let new = report.states[0].new.as_ref().unwrap();
    assert_eq!(new.version.as_deref(), Some(expected));
    assert_eq!(
        new.locator.url(),
        format!("https://e.com/dl/tool-{expected}.tar.gz")
    );
}

#[tokio::test]
async fn child_builds_locator_from_parent_result() {
    let manifest = json_manifest(
        r#"[
            {
                "type": "file",
                "url": "https://e.com/plugin-1.0.0.zip",
                "sha256": "aa",
                "x-checker-data": {
                    "type": "json",
                    "parent-id": "engine",
                    "version-query": "$parent.new.version",
                    "url-template": "https://e.com/plugin-$version.zip"
                }
            },
            {
                "type": "git",
                "url": "https://git.e.com/engine.git",
                "tag": "v1.0.0",
                "commit": "c100",
                "x-checker-data": {
                    "type": "git",
                    "source-id": "engine",
                    "tag-pattern": "^v([\\d.]+)$"
                }
            }
        ]"#,
    );
    let git = FakeGit::new().with_refs(
        "https://git.e.com/engine.git",
        &[("refs/tags/v1.0.0", "c100"), ("refs/tags/v1.2.3", "c123")],
    );

    let report = create_orchestrator(FakeFetcher::new(), git, options())
        .run(&manifest)
        .await
        .unwrap();

    let child = &report.states[0];
    assert_eq!(child.status, Status::Updatable);
    let new = child.new.as_ref().unwrap();
    assert_eq!(new.version.as_deref(), Some("1.2.3"));
    assert_eq!(new.locator.url(), "https://e.com/plugin-1.2.3.zip");
    assert_eq!(report.states[1].status, Status::Updatable);
}

#[tokio::test]
async fn child_of_broken_parent_has_no_new_version_to_use() {
    let manifest = json_manifest(
        r#"[
            {
                "type": "git",
                "url": "https://git.e.com/gone.git",
                "tag": "v1.0.0",
                "x-checker-data": {"type": "git", "source-id": "engine", "tag-pattern": "^v(.+)$"}
            },
            {
                "type": "file",
                "url": "https://e.com/plugin-1.0.0.zip",
                "sha256": "aa",
                "x-checker-data": {
                    "type": "json",
                    "parent-id": "engine",
                    "version-query": "$parent.new.version",
                    "url-template": "https://e.com/plugin-$version.zip"
                }
            }
        ]"#,
    );

    let report = create_orchestrator(FakeFetcher::new(), FakeGit::new(), options())
        .run(&manifest)
        .await
        .unwrap();

    // Unknown repositories are confirmed gone; the BROKEN parent has no `new`
    assert_eq!(report.states[0].status, Status::Broken);
    assert_eq!(report.states[1].status, Status::Error);
    assert_eq!(report.outcome(), Status::Broken);
}

#[rstest]
#[case(404, Status::Broken)]
#[case(410, Status::Broken)]
#[case(503, Status::Error)]
#[case(429, Status::Error)]
#[tokio::test]
async fn unreachable_primary_source_is_broken_only_when_confirmed_absent(
    #[case] status: u16,
    #[case] expected: Status,
) {
    let manifest = json_manifest(
        r#"[{
            "type": "file",
            "url": "https://e.com/latest.tar.gz",
            "sha256": "aa",
            "x-checker-data": {"type": "rotating-url"}
        }]"#,
    );
    let fetcher = FakeFetcher::new().with_status("https://e.com/latest.tar.gz", status);

    let report = create_orchestrator(fetcher, FakeGit::new(), options())
        .run(&manifest)
        .await
        .unwrap();

    assert_eq!(report.states[0].status, expected);
    assert!(report.states[0].cause.is_some());
}

#[rstest]
#[case(r#"{
    "type": "html",
    "url": "https://e.com/releases",
    "version-pattern": "tool-([\\d.]+)\\.tar\\.gz",
    "url-template": "https://e.com/dl/tool-$version.tar.gz"
}"#)]
#[case(r#"{
    "type": "rotating-url",
    "url": "https://e.com/releases"
}"#)]
#[tokio::test]
async fn missing_discovery_page_is_error_not_broken(#[case] checker_data: &str) {
    let manifest = json_manifest(&format!(
        r#"[{{
            "type": "archive",
            "url": "https://e.com/dl/tool-1.0.tar.gz",
            "sha256": "aa",
            "x-checker-data": {checker_data}
        }}]"#
    ));
    let fetcher = FakeFetcher::new()
        .with_page("https://e.com/dl/tool-1.0.tar.gz", "tool 1.0")
        .with_status("https://e.com/releases", 404);

    let report = create_orchestrator(fetcher, FakeGit::new(), options())
        .run(&manifest)
        .await
        .unwrap();

    let state = &report.states[0];
    assert_eq!(state.status, Status::Error);
    assert!(state.cause.as_deref().unwrap().contains("https://e.com/releases"));
    assert_eq!(report.outcome(), Status::Error);
}

#[tokio::test]
async fn sibling_failures_do_not_abort_other_checks() {
    let manifest = json_manifest(
        r#"[
            {"type": "file", "url": "https://e.com/a.tgz", "sha256": "aa",
             "x-checker-data": {"type": "rotating-url"}},
            {"type": "file", "url": "https://e.com/b.tgz", "sha256": "bb",
             "x-checker-data": {"type": "html", "url": "https://e.com/b"}},
            {"type": "file", "url": "https://e.com/c.tgz", "sha256": "cc"}
        ]"#,
    );
    let fetcher = FakeFetcher::new().with_status("https://e.com/a.tgz", 503);

    let report = create_orchestrator(fetcher, FakeGit::new(), options())
        .run(&manifest)
        .await
        .unwrap();

    assert_eq!(report.states.len(), 2);
    assert_eq!(report.states[0].status, Status::Error);
    assert_eq!(report.states[1].status, Status::Error);
    assert!(report.states[1].cause.as_deref().unwrap().contains("pattern"));
}

#[tokio::test]
async fn unchanged_rotating_url_is_current() {
    let body = "stable content";
    let sha256 = digest::hash(body.as_bytes()).digests.sha256.unwrap();
    let manifest = json_manifest(&format!(
        r#"[{{
            "type": "file",
            "url": "https://e.com/latest.tar.gz",
            "sha256": "{sha256}",
            "x-checker-data": {{"type": "rotating-url"}}
        }}]"#
    ));
    let fetcher = FakeFetcher::new().with_page("https://e.com/latest.tar.gz", body);
    let options = RunOptions {
        complete_digests: true,
        ..options()
    };

    let report = create_orchestrator(fetcher, FakeGit::new(), options)
        .run(&manifest)
        .await
        .unwrap();

    assert_eq!(report.states[0].status, Status::Current);
}

#[tokio::test]
async fn rotated_content_behind_same_url_is_updatable() {
    let manifest = json_manifest(
        r#"[{
            "type": "file",
            "url": "https://e.com/latest.tar.gz",
            "sha256": "0000000000000000000000000000000000000000000000000000000000000000",
            "x-checker-data": {"type": "rotating-url"}
        }]"#,
    );
    let fetcher = FakeFetcher::new().with_page("https://e.com/latest.tar.gz", "rebuilt");
    let options = RunOptions {
        complete_digests: true,
        ..options()
    };

    let report = create_orchestrator(fetcher, FakeGit::new(), options)
        .run(&manifest)
        .await
        .unwrap();

    assert_eq!(report.states[0].status, Status::Updatable);
    assert_eq!(
        report.states[0].new.as_ref().unwrap().digests,
        digest::hash(b"rebuilt").digests
    );
}

#[rstest]
#[case(r#"[
    {"type": "git", "url": "https://g/a.git", "tag": "v1", "x-checker-data": {"type": "git", "source-id": "a", "parent-id": "b"}},
    {"type": "git", "url": "https://g/b.git", "tag": "v1", "x-checker-data": {"type": "git", "source-id": "b", "parent-id": "a"}}
]"#)]
#[case(r#"[
    {"type": "git", "url": "https://g/a.git", "tag": "v1", "x-checker-data": {"type": "git", "source-id": "a"}},
    {"type": "git", "url": "https://g/b.git", "tag": "v1", "x-checker-data": {"type": "git", "source-id": "a"}}
]"#)]
#[case(r#"[
    {"type": "git", "url": "https://g/a.git", "tag": "v1", "x-checker-data": {"type": "git", "parent-id": "missing"}}
]"#)]
#[tokio::test]
async fn invalid_graph_aborts_before_any_check(#[case] text: &str) {
    let fetcher = FakeFetcher::new();
    let git = FakeGit::new();

    let result = create_orchestrator(fetcher, git, options())
        .run(&json_manifest(text))
        .await;

    assert!(matches!(
        result,
        Err(GraphError::Cycle(_) | GraphError::DuplicateSourceId { .. } | GraphError::UnknownParent { .. })
    ));
}

#[tokio::test]
async fn run_timeout_reports_error_not_broken() {
    let manifest = json_manifest(
        r#"[{
            "type": "file",
            "url": "https://e.com/latest.tar.gz",
            "sha256": "aa",
            "x-checker-data": {"type": "rotating-url"}
        }]"#,
    );
    let fetcher = FakeFetcher::new()
        .with_status("https://e.com/latest.tar.gz", 404)
        .with_delay(Duration::from_secs(5));
    let options = RunOptions {
        timeout: Some(Duration::from_millis(50)),
        ..options()
    };

    let report = create_orchestrator(fetcher, FakeGit::new(), options)
        .run(&manifest)
        .await
        .unwrap();

    assert_eq!(report.states[0].status, Status::Error);
    assert!(report.states[0].cause.as_deref().unwrap().contains("Cancelled"));
}

#[tokio::test]
async fn concurrency_of_one_still_checks_everything() {
    let manifest = json_manifest(
        r#"[
            {"type": "file", "url": "https://e.com/a.tgz", "sha256": "aa", "x-checker-data": {"type": "rotating-url"}},
            {"type": "file", "url": "https://e.com/b.tgz", "sha256": "bb", "x-checker-data": {"type": "rotating-url"}},
            {"type": "file", "url": "https://e.com/c.tgz", "sha256": "cc", "x-checker-data": {"type": "rotating-url"}}
        ]"#,
    );
    let fetcher = FakeFetcher::new()
        .with_redirect("https://e.com/a.tgz", "https://e.com/a-2.tgz")
        .with_redirect("https://e.com/b.tgz", "https://e.com/b-2.tgz")
        .with_redirect("https://e.com/c.tgz", "https://e.com/c-2.tgz");
    let options = RunOptions {
        concurrency: 1,
        ..options()
    };

    let report = create_orchestrator(fetcher, FakeGit::new(), options)
        .run(&manifest)
        .await
        .unwrap();

    let urls: Vec<&str> = report
        .states
        .iter()
        .map(|state| state.new.as_ref().unwrap().locator.url())
        .collect();
    assert_eq!(
        urls,
        vec!["https://e.com/a-2.tgz", "https://e.com/b-2.tgz", "https://e.com/c-2.tgz"]
    );
}

#[tokio::test]
async fn concurrency_limit_bounds_requests_in_flight() {
    let manifest = json_manifest(
        r#"[
            {"type": "file", "url": "https://e.com/a.tgz", "sha256": "aa", "x-checker-data": {"type": "rotating-url"}},
            {"type": "file", "url": "https://e.com/b.tgz", "sha256": "bb", "x-checker-data": {"type": "rotating-url"}},
            {"type": "file", "url": "https://e.com/c.tgz", "sha256": "cc", "x-checker-data": {"type": "rotating-url"}},
            {"type": "file", "url": "https://e.com/d.tgz", "sha256": "dd", "x-checker-data": {"type": "rotating-url"}},
            {"type": "file", "url": "https://e.com/e.tgz", "sha256": "ee", "x-checker-data": {"type": "rotating-url"}}
        ]"#,
    );
    let fetcher = Arc::new(FakeFetcher::new().with_delay(Duration::from_millis(30)));
    let options = RunOptions {
        concurrency: 2,
        ..options()
    };

    let report = create_orchestrator_with(fetcher.clone(), FakeGit::new(), options)
        .run(&manifest)
        .await
        .unwrap();

    assert_eq!(report.states.len(), 5);
    assert_eq!(fetcher.requests().len(), 5);
    assert_eq!(fetcher.peak_in_flight(), 2);
}

#[tokio::test]
async fn child_of_failed_parent_sees_null_parent() {
    let manifest = json_manifest(
        r#"[
            {
                "type": "file",
                "url": "https://e.com/plugin-1.0.0.zip",
                "sha256": "aa",
                "x-checker-data": {
                    "type": "json",
                    "parent-id": "engine",
                    "version-query": "$parent.current.url",
                    "url-template": "https://e.com/plugin-$version.zip"
                }
            },
            {
                "type": "file",
                "url": "https://e.com/engine.tgz",
                "sha256": "bb",
                "x-checker-data": {"type": "rotating-url", "source-id": "engine"}
            }
        ]"#,
    );
    let fetcher = FakeFetcher::new().with_status("https://e.com/engine.tgz", 503);

    let report = create_orchestrator(fetcher, FakeGit::new(), options())
        .run(&manifest)
        .await
        .unwrap();

    assert_eq!(report.states[1].status, Status::Error);
    // A published parent always carries `current`; only a null `$parent` misses it
    let child = &report.states[0];
    assert_eq!(child.status, Status::Error);
    let cause = child.cause.as_deref().unwrap();
    assert!(cause.contains("$parent.current.url"), "{cause}");
    assert!(!cause.contains("Cancelled"), "{cause}");
}

#[tokio::test]
async fn child_waits_for_slow_parent() {
    let manifest = json_manifest(
        r#"[
            {
                "type": "file",
                "url": "https://e.com/plugin-1.0.zip",
                "sha256": "aa",
                "x-checker-data": {
                    "type": "json",
                    "parent-id": "engine",
                    "url": "https://e.com/plugins.json",
                    "version-query": "$parent.new.version",
                    "url-template": "https://e.com/plugin-$version.zip"
                }
            },
            {
                "type": "file",
                "url": "https://e.com/other.tgz",
                "sha256": "cc",
                "x-checker-data": {"type": "rotating-url"}
            },
            {
                "type": "file",
                "url": "https://e.com/engine-latest.tgz",
                "sha256": "bb",
                "x-checker-data": {
                    "type": "rotating-url",
                    "source-id": "engine",
                    "pattern": "engine-([\\d.]+)\\.tgz"
                }
            }
        ]"#,
    );
    let fetcher = Arc::new(
        FakeFetcher::new()
            .with_redirect("https://e.com/engine-latest.tgz", "https://e.com/engine-2.0.tgz")
            .with_page("https://e.com/plugins.json", "{}")
            .with_slow_url("https://e.com/engine-latest.tgz", Duration::from_millis(100)),
    );

    let report = create_orchestrator_with(fetcher.clone(), FakeGit::new(), options())
        .run(&manifest)
        .await
        .unwrap();

    let timeline = fetcher.timeline();
    let position = |event: &str| timeline.iter().position(|e| e == event).unwrap();
    assert!(position("> https://e.com/other.tgz") < position("< https://e.com/engine-latest.tgz"));
    assert!(position("< https://e.com/engine-latest.tgz") < position("> https://e.com/plugins.json"));

    let child = &report.states[0];
    assert_eq!(child.status, Status::Updatable);
    assert_eq!(child.new.as_ref().unwrap().locator.url(), "https://e.com/plugin-2.0.zip");
}
