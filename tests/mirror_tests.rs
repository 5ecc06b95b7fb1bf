mod common;

use chrono::{TimeZone, Utc};
use common::{MemoryStore, StubCloner, StubResolver, PNG};
use repomirror::codecommit::StaticResolver;
use repomirror::credentials::{AwsCredentials, CredentialProvider, FixedClock, StaticCredentialSource};
use repomirror::git::GitCloner;
use repomirror::sign::GitSigner;
use repomirror::{CodeCommitEvent, Config, InvocationState, Mirror, MirrorError};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

const EVENT: &str = r#"{
    "Records": [{
        "awsRegion": "us-east-1",
        "eventSource": "aws:codecommit",
        "eventSourceARN": "arn:aws:codecommit:us-east-1:123456789012:my-repo"
    }]
}"#;

fn event() -> CodeCommitEvent {
    CodeCommitEvent::from_json(EVENT.as_bytes()).unwrap()
}

fn provider() -> CredentialProvider {
    let source = StaticCredentialSource::new(AwsCredentials::new(
        "AKIDEXAMPLE",
        "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
        Some("session-token".to_string()),
    ));
    let clock = FixedClock(Utc.with_ymd_and_hms(2024, 1, 15, 9, 30, 0).unwrap());
    CredentialProvider::with_clock(Arc::new(source), GitSigner::new("us-east-1"), Arc::new(clock))
}

fn config(workspace: &Path) -> Config {
    let mut config = Config::new("us-east-1", "site");
    config.clone_dir = workspace.join("store");
    config
}

fn site_files() -> Vec<(&'static str, &'static [u8])> {
    vec![
        ("README.md", &b"# not published\n"[..]),
        ("public/index.html", &b"<html><body>hi</body></html>"[..]),
        ("public/css/site.css", &b"body { margin: 0 }"[..]),
        ("public/img/logo.png", PNG),
    ]
}

struct Harness {
    mirror: Mirror,
    store: Arc<MemoryStore>,
    resolver: Arc<StubResolver>,
    cloner: Arc<StubCloner>,
}

fn harness(workspace: &Path, resolver: StubResolver, cloner: StubCloner, store: MemoryStore) -> Harness {
    let store = Arc::new(store);
    let resolver = Arc::new(resolver);
    let cloner = Arc::new(cloner);
    let mirror = Mirror::new(config(workspace), resolver.clone(), cloner.clone(), store.clone());
    Harness {
        mirror,
        store,
        resolver,
        cloner,
    }
}

#[tokio::test]
async fn test_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("site");
    store.seed(["old/page.html".to_string(), "favicon.ico".to_string()]);
    let h = harness(
        tmp.path(),
        StubResolver::new(),
        StubCloner::new(Arc::new(provider()), site_files()),
        store,
    );

    let report = h.mirror.handle_event(&event()).await.unwrap();

    assert_eq!(report.repository, "my-repo");
    assert_eq!(report.deleted, 2);
    assert_eq!(report.uploaded, 3);
    assert_eq!(h.mirror.state(), InvocationState::Done);
    assert_eq!(*h.resolver.resolved.lock().unwrap(), vec!["my-repo".to_string()]);

    let challenges = h.cloner.challenges.lock().unwrap();
    assert_eq!(challenges.len(), 1);
    let (url, username, password) = &challenges[0];
    assert_eq!(url, "https://git-codecommit.us-east-1.amazonaws.com/v1/repos/my-repo");
    assert_eq!(username, "AKIDEXAMPLE%session-token");
    assert!(password.starts_with("20240115T093000Z"));
    assert_eq!(password.len(), 16 + 64);

    assert_eq!(
        h.store.keys(),
        vec!["css/site.css", "img/logo.png", "index.html"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
    assert_eq!(h.store.get("img/logo.png").unwrap().content_type, "image/png");
    assert_eq!(
        h.store.get("index.html").unwrap().content_type,
        "text/html; charset=utf-8"
    );
}

#[tokio::test]
async fn test_stale_workspace_is_purged() {
    let tmp = TempDir::new().unwrap();
    common::write_tree(
        &tmp.path().join("store"),
        &[("public/stale.html", b"<p>left over</p>")],
    );
    let h = harness(
        tmp.path(),
        StubResolver::new(),
        StubCloner::new(Arc::new(provider()), site_files()),
        MemoryStore::new("site"),
    );

    h.mirror.handle_event(&event()).await.unwrap();

    assert!(h.store.get("stale.html").is_none());
    assert!(!tmp.path().join("store/public/stale.html").exists());
}

#[tokio::test]
async fn test_invalid_event_fails_before_resolve() {
    let tmp = TempDir::new().unwrap();
    let h = harness(
        tmp.path(),
        StubResolver::new(),
        StubCloner::new(Arc::new(provider()), site_files()),
        MemoryStore::new("site"),
    );
    let event = CodeCommitEvent::from_json(br#"{"Records":[{"eventSourceARN":""}]}"#).unwrap();

    let err = h.mirror.handle_event(&event).await.unwrap_err();

    assert!(matches!(err, MirrorError::InvalidEvent(_)));
    assert_eq!(h.mirror.state(), InvocationState::Failed);
    assert!(h.resolver.resolved.lock().unwrap().is_empty());
    assert!(h.cloner.challenges.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_lookup_failure_leaves_bucket_alone() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("site");
    store.seed(["index.html".to_string()]);
    let h = harness(
        tmp.path(),
        StubResolver::failing(),
        StubCloner::new(Arc::new(provider()), site_files()),
        store,
    );

    let err = h.mirror.handle_event(&event()).await.unwrap_err();

    assert!(matches!(err, MirrorError::RepositoryLookup { .. }));
    assert_eq!(h.store.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_clone_failure_leaves_bucket_alone() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("site");
    store.seed(["index.html".to_string()]);
    let mut cloner = StubCloner::new(Arc::new(provider()), site_files());
    cloner.fail = true;
    let h = harness(tmp.path(), StubResolver::new(), cloner, store);

    let err = h.mirror.handle_event(&event()).await.unwrap_err();

    assert!(matches!(err, MirrorError::CloneFailure { .. }));
    assert_eq!(h.mirror.state(), InvocationState::Failed);
    assert_eq!(h.store.list_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.delete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn test_clear_failure_skips_sync() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("site");
    store.seed(["index.html".to_string()]);
    store.fail_delete();
    let h = harness(
        tmp.path(),
        StubResolver::new(),
        StubCloner::new(Arc::new(provider()), site_files()),
        store,
    );

    let err = h.mirror.handle_event(&event()).await.unwrap_err();

    assert!(matches!(err, MirrorError::BucketClearFailure { .. }));
    assert_eq!(h.store.put_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_partial_sync_failure_is_reported() {
    let tmp = TempDir::new().unwrap();
    let store = MemoryStore::new("site");
    store.fail_put_of("css/site.css");
    let h = harness(
        tmp.path(),
        StubResolver::new(),
        StubCloner::new(Arc::new(provider()), site_files()),
        store,
    );

    let err = h.mirror.handle_event(&event()).await.unwrap_err();

    assert!(matches!(
        err,
        MirrorError::SyncPartialFailure {
            failed: 1,
            attempted: 3,
            ..
        }
    ));
    assert_eq!(h.store.len(), 2);
}

fn commit_file(repo: &git2::Repository, path: &str, body: &[u8], refname: &str, parents: &[&git2::Commit]) -> git2::Oid {
    let workdir = repo.workdir().unwrap().to_path_buf();
    common::write_tree(&workdir, &[(path, body)]);

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(path)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = git2::Signature::now("Test", "test@example.com").unwrap();
    repo.commit(Some(refname), &sig, &sig, path, &tree, parents)
        .unwrap()
}

/// Source repository: default branch has index.html, `release` adds release.txt
fn init_source_repo(dir: &Path) {
    let repo = git2::Repository::init(dir).unwrap();
    let first = commit_file(&repo, "public/index.html", b"<html></html>", "HEAD", &[]);
    let first = repo.find_commit(first).unwrap();
    commit_file(
        &repo,
        "public/release.txt",
        b"release notes",
        "refs/heads/release",
        &[&first],
    );
}

async fn mirror_local_repo(branch: Option<&str>) -> Vec<String> {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("repos/my-repo");
    init_source_repo(&source);

    let provider = provider();
    let resolver = StaticResolver::new(
        format!("file://{}/repos/{{name}}", tmp.path().display()),
        provider.clone(),
    );
    let cloner = GitCloner::new(Arc::new(provider)).with_branch(branch.map(String::from));
    let store = Arc::new(MemoryStore::new("site"));

    let mut config = config(tmp.path());
    config.branch = branch.map(String::from);
    let mirror = Mirror::new(config, Arc::new(resolver), Arc::new(cloner), store.clone());

    let report = mirror.handle_event(&event()).await.unwrap();
    assert_eq!(report.repository, "my-repo");
    store.keys()
}

#[tokio::test]
async fn test_local_clone_default_branch() {
    assert_eq!(mirror_local_repo(None).await, vec!["index.html".to_string()]);
}

#[tokio::test]
async fn test_local_clone_selected_branch() {
    assert_eq!(
        mirror_local_repo(Some("release")).await,
        vec!["index.html".to_string(), "release.txt".to_string()]
    );
}

#[tokio::test]
async fn test_from_config_builds_production_wiring() {
    let tmp = TempDir::new().unwrap();
    let source = Arc::new(StaticCredentialSource::new(AwsCredentials::new(
        "AKIDEXAMPLE",
        "secret",
        None,
    )));

    let mirror = Mirror::from_config(config(tmp.path()), source.clone()).unwrap();
    assert_eq!(mirror.config().bucket, "site");
    assert_eq!(mirror.state(), InvocationState::Idle);

    let err = Mirror::from_config(Config::new("us-east-1", ""), source)
        .err()
        .unwrap();
    assert!(matches!(err, MirrorError::Configuration(_)));
}
