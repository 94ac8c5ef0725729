//! Shared test doubles: a filesystem-backed fake git, a scripted remote
//! index, and a canned HTTP fetcher.
//!
//! `FakeGit` keeps each repository's state in `<dir>/.git/fake_state`, so
//! state travels with the directory across the renames the planner performs,
//! exactly like a real `.git` directory would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use jiri_core::remote::{HttpFetch, RemoteIndex, RepoStatus};
use jiri_core::{CoreError, GitOps};

/// A remote repository as the fake git sees it.
#[derive(Debug, Clone, Default)]
pub struct RemoteSpec {
    /// Branch name to tip revision.
    pub branches: HashMap<String, String>,
    /// Files materialized into every clone, relative to the clone root.
    pub files: Vec<(PathBuf, String)>,
    /// Make fetches from this remote fail.
    pub fail_fetch: bool,
}

impl RemoteSpec {
    pub fn at(tip: &str) -> Self {
        RemoteSpec {
            branches: HashMap::from([("master".to_owned(), tip.to_owned())]),
            ..RemoteSpec::default()
        }
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.push((PathBuf::from(path), content.to_owned()));
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_fetch = true;
        self
    }
}

#[derive(Default)]
pub struct FakeGit {
    remotes: Mutex<HashMap<String, RemoteSpec>>,
}

impl FakeGit {
    pub fn new() -> Self {
        FakeGit::default()
    }

    pub fn add_remote(&self, url: &str, spec: RemoteSpec) {
        self.remotes
            .lock()
            .unwrap()
            .insert(url.to_owned(), spec);
    }

    /// Materialize a pre-existing local checkout of `remote`, detached at
    /// the remote master tip.
    pub fn seed_checkout(&self, dir: &Path, remote: &str) {
        self.clone_repo(remote, dir, None).expect("seed clone");
        self.checkout(dir, "origin/master", true, false)
            .expect("seed checkout");
    }

    /// Directly edit a repository's recorded state.
    pub fn mutate_state(&self, dir: &Path, f: impl FnOnce(&mut HashMap<String, String>)) {
        let mut state = load_state(dir).expect("state");
        f(&mut state);
        store_state(dir, &state).expect("store state");
    }

    pub fn state_value(&self, dir: &Path, key: &str) -> Option<String> {
        load_state(dir).ok()?.get(key).cloned()
    }

    fn spec_of(&self, url: &str) -> Result<RemoteSpec, CoreError> {
        self.remotes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| git_err(format!("unknown remote {url}")))
    }
}

fn git_err(message: String) -> CoreError {
    CoreError::Git {
        args: vec![],
        message,
    }
}

fn state_path(dir: &Path) -> PathBuf {
    dir.join(".git").join("fake_state")
}

fn load_state(dir: &Path) -> Result<HashMap<String, String>, CoreError> {
    let contents = std::fs::read_to_string(state_path(dir))
        .map_err(|_| git_err(format!("not a git repository: {}", dir.display())))?;
    Ok(contents
        .lines()
        .filter_map(|line| line.split_once('\t'))
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect())
}

fn store_state(dir: &Path, state: &HashMap<String, String>) -> Result<(), CoreError> {
    let mut keys: Vec<_> = state.keys().collect();
    keys.sort();
    let contents: String = keys
        .into_iter()
        .map(|k| format!("{k}\t{}\n", state[k]))
        .collect();
    std::fs::write(state_path(dir), contents)
        .map_err(|e| git_err(format!("write state: {e}")))?;
    Ok(())
}

fn flag(state: &HashMap<String, String>, key: &str) -> bool {
    state.get(key).map(|v| v == "1").unwrap_or(false)
}

fn set_flag(state: &mut HashMap<String, String>, key: &str, value: bool) {
    state.insert(key.to_owned(), if value { "1" } else { "0" }.to_owned());
}

fn resolve(state: &HashMap<String, String>, rev: &str) -> String {
    state
        .get(&format!("ref:{rev}"))
        .cloned()
        .unwrap_or_else(|| rev.to_owned())
}

fn refresh_refs(state: &mut HashMap<String, String>, spec: &RemoteSpec) {
    for (branch, tip) in &spec.branches {
        state.insert(format!("ref:origin/{branch}"), tip.clone());
    }
}

impl GitOps for FakeGit {
    fn clone_repo(
        &self,
        remote: &str,
        dir: &Path,
        _reference: Option<&Path>,
    ) -> Result<(), CoreError> {
        let spec = self.spec_of(remote)?;
        for sub in ["hooks", "info"] {
            let git_sub = dir.join(".git").join(sub);
            std::fs::create_dir_all(&git_sub).map_err(|e| git_err(format!("clone: {e}")))?;
        }
        for (rel, content) in &spec.files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| git_err(format!("clone: {e}")))?;
            }
            std::fs::write(&path, content).map_err(|e| git_err(format!("clone: {e}")))?;
        }
        let tip = spec.branches.get("master").cloned().unwrap_or_default();
        let mut state = HashMap::from([
            ("remote_url".to_owned(), remote.to_owned()),
            ("head".to_owned(), tip),
            ("branch".to_owned(), "master".to_owned()),
            ("tracking:master".to_owned(), "origin/master".to_owned()),
            ("branches".to_owned(), "master".to_owned()),
        ]);
        refresh_refs(&mut state, &spec);
        store_state(dir, &state)
    }

    fn clone_mirror(&self, remote: &str, dir: &Path) -> Result<(), CoreError> {
        let spec = self.spec_of(remote)?;
        std::fs::create_dir_all(dir.join(".git")).map_err(|e| git_err(format!("mirror: {e}")))?;
        let mut state = HashMap::from([("remote_url".to_owned(), remote.to_owned())]);
        refresh_refs(&mut state, &spec);
        store_state(dir, &state)
    }

    fn fetch(&self, dir: &Path, _remote: &str, _prune: bool, _all: bool) -> Result<(), CoreError> {
        let mut state = load_state(dir)?;
        let url = state.get("remote_url").cloned().unwrap_or_default();
        let spec = self.spec_of(&url)?;
        if spec.fail_fetch {
            return Err(git_err(format!("could not fetch from {url}")));
        }
        refresh_refs(&mut state, &spec);
        store_state(dir, &state)
    }

    fn set_remote_url(&self, dir: &Path, _name: &str, url: &str) -> Result<(), CoreError> {
        let mut state = load_state(dir)?;
        state.insert("remote_url".to_owned(), url.to_owned());
        store_state(dir, &state)
    }

    fn checkout(&self, dir: &Path, rev: &str, detach: bool, _force: bool) -> Result<(), CoreError> {
        let mut state = load_state(dir)?;
        let head = resolve(&state, rev);
        state.insert("head".to_owned(), head);
        if detach {
            state.insert("branch".to_owned(), String::new());
        } else {
            state.insert("branch".to_owned(), rev.to_owned());
        }
        store_state(dir, &state)
    }

    fn rebase(&self, dir: &Path, upstream: &str) -> Result<(), CoreError> {
        let mut state = load_state(dir)?;
        if flag(&state, "rebase_conflict") {
            return Err(git_err("rebase conflict".to_owned()));
        }
        let head = resolve(&state, upstream);
        state.insert("head".to_owned(), head);
        store_state(dir, &state)
    }

    fn rebase_abort(&self, _dir: &Path) -> Result<(), CoreError> {
        Ok(())
    }

    fn stash(&self, dir: &Path) -> Result<bool, CoreError> {
        let mut state = load_state(dir)?;
        if !flag(&state, "uncommitted") {
            return Ok(false);
        }
        set_flag(&mut state, "uncommitted", false);
        set_flag(&mut state, "stashed", true);
        store_state(dir, &state)?;
        Ok(true)
    }

    fn stash_pop(&self, dir: &Path) -> Result<(), CoreError> {
        let mut state = load_state(dir)?;
        set_flag(&mut state, "stashed", false);
        set_flag(&mut state, "uncommitted", true);
        store_state(dir, &state)
    }

    fn current_branch(&self, dir: &Path) -> Result<Option<String>, CoreError> {
        let state = load_state(dir)?;
        Ok(state.get("branch").filter(|b| !b.is_empty()).cloned())
    }

    fn tracking_branch(&self, dir: &Path) -> Result<Option<String>, CoreError> {
        let state = load_state(dir)?;
        let Some(branch) = state.get("branch").filter(|b| !b.is_empty()) else {
            return Ok(None);
        };
        Ok(state
            .get(&format!("tracking:{branch}"))
            .filter(|t| !t.is_empty())
            .cloned())
    }

    fn current_revision(&self, dir: &Path) -> Result<String, CoreError> {
        let state = load_state(dir)?;
        Ok(state.get("head").cloned().unwrap_or_default())
    }

    fn resolve_revision(&self, dir: &Path, rev: &str) -> Result<String, CoreError> {
        let state = load_state(dir)?;
        Ok(resolve(&state, rev))
    }

    fn top_level(&self, dir: &Path) -> Result<PathBuf, CoreError> {
        Ok(dir.to_path_buf())
    }

    fn branches(&self, dir: &Path) -> Result<Vec<String>, CoreError> {
        let state = load_state(dir)?;
        Ok(state
            .get("branches")
            .map(|b| b.split(',').map(str::to_owned).collect())
            .unwrap_or_default())
    }

    fn has_uncommitted(&self, dir: &Path) -> Result<bool, CoreError> {
        Ok(flag(&load_state(dir)?, "uncommitted"))
    }

    fn has_untracked(&self, dir: &Path) -> Result<bool, CoreError> {
        Ok(flag(&load_state(dir)?, "untracked"))
    }

    fn log(
        &self,
        _dir: &Path,
        _from: &str,
        _to: &str,
        _format: &str,
    ) -> Result<Vec<String>, CoreError> {
        Ok(vec![])
    }

    fn commit_file(&self, _dir: &Path, _file: &Path, _message: &str) -> Result<(), CoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Remote index and HTTP doubles
// ---------------------------------------------------------------------------

/// A remote index scripted with per-host repo statuses.
#[derive(Default)]
pub struct FakeIndex {
    /// host -> repo name -> status
    pub statuses: Mutex<HashMap<String, HashMap<String, RepoStatus>>>,
}

impl FakeIndex {
    pub fn set_status(&self, host: &str, repo: &str, branch: &str, revision: &str) {
        let mut statuses = self.statuses.lock().unwrap();
        statuses
            .entry(host.to_owned())
            .or_default()
            .entry(repo.to_owned())
            .or_default()
            .branches
            .insert(branch.to_owned(), revision.to_owned());
    }
}

impl RemoteIndex for FakeIndex {
    fn batch_host(&self, remote: &str) -> Option<String> {
        let statuses = self.statuses.lock().unwrap();
        statuses
            .keys()
            .find(|host| remote.starts_with(host.as_str()))
            .cloned()
    }

    fn repo_statuses(
        &self,
        host: &str,
        _branches: &[String],
    ) -> Result<HashMap<String, RepoStatus>, CoreError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or_default())
    }
}

/// An HTTP fetcher answering every URL with the same body.
#[derive(Default)]
pub struct FakeHttp {
    pub body: Vec<u8>,
    pub requests: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn with_body(body: &[u8]) -> Self {
        FakeHttp {
            body: body.to_vec(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl HttpFetch for FakeHttp {
    fn get(&self, url: &str) -> Result<Vec<u8>, CoreError> {
        self.requests.lock().unwrap().push(url.to_owned());
        Ok(self.body.clone())
    }
}
