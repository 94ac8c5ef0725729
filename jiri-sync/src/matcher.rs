//! Rename detection between local and remote project sets.
//!
//! A project renamed upstream (or whose remote URL changed) no longer matches
//! its local checkout by key. When a stray local shares both remote and path
//! with an unmatched remote project, the local's computed key is rewritten so
//! the pair reconciles as an update instead of a delete plus create.

use std::collections::BTreeSet;

use jiri_core::{ProjectKey, Projects};

/// Rewrite the keys of local projects that match a remote project by
/// `(remote, path)` but not by key.
pub fn match_local_with_remote(local: &mut Projects, remote: &Projects) {
    let mut strays: BTreeSet<ProjectKey> = local
        .keys()
        .filter(|key| !remote.contains_key(key))
        .cloned()
        .collect();
    if strays.is_empty() {
        return;
    }

    for (remote_key, remote_project) in remote {
        if local.contains_key(remote_key) {
            continue;
        }
        let matched = strays.iter().find(|&stray| {
            let candidate = &local[stray];
            candidate.remote == remote_project.remote && candidate.path == remote_project.path
        });
        let Some(stray_key) = matched.cloned() else {
            continue;
        };
        if let Some(mut project) = local.remove(&stray_key) {
            strays.remove(&stray_key);
            project.computed_key = Some(remote_key.clone());
            local.insert(remote_key.clone(), project);
        }
        if strays.is_empty() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use jiri_core::Project;

    use super::*;

    fn project(name: &str, remote: &str, path: &str) -> Project {
        let mut p = Project {
            name: name.to_owned(),
            remote: remote.to_owned(),
            path: PathBuf::from(path),
            ..Project::default()
        };
        p.fill_defaults().unwrap();
        p
    }

    fn projects(entries: &[Project]) -> Projects {
        entries.iter().map(|p| (p.key(), p.clone())).collect()
    }

    #[test]
    fn rename_is_collapsed_into_update() {
        let mut local = projects(&[project("a", "https://r/repo", "/w/path-0")]);
        let remote = projects(&[project("b", "https://r/repo", "/w/path-0")]);

        match_local_with_remote(&mut local, &remote);

        let remote_key = ProjectKey::new("b", "https://r/repo");
        assert_eq!(local.len(), 1);
        let moved = &local[&remote_key];
        assert_eq!(moved.name, "a");
        assert_eq!(moved.key(), remote_key);
    }

    #[test]
    fn key_match_is_left_alone() {
        let p = project("a", "https://r/repo", "/w/a");
        let mut local = projects(&[p.clone()]);
        let remote = projects(&[p.clone()]);

        match_local_with_remote(&mut local, &remote);
        assert!(local[&p.key()].computed_key.is_none());
    }

    #[test]
    fn different_path_is_not_a_rename() {
        let mut local = projects(&[project("a", "https://r/repo", "/w/old")]);
        let remote = projects(&[project("b", "https://r/repo", "/w/new")]);

        match_local_with_remote(&mut local, &remote);
        assert!(local.contains_key(&ProjectKey::new("a", "https://r/repo")));
        assert!(!local.contains_key(&ProjectKey::new("b", "https://r/repo")));
    }

    #[test]
    fn multiple_renames_resolve_independently() {
        let mut local = projects(&[
            project("a", "https://r/1", "/w/one"),
            project("b", "https://r/2", "/w/two"),
        ]);
        let remote = projects(&[
            project("a2", "https://r/1", "/w/one"),
            project("b2", "https://r/2", "/w/two"),
        ]);

        match_local_with_remote(&mut local, &remote);
        assert!(local.contains_key(&ProjectKey::new("a2", "https://r/1")));
        assert!(local.contains_key(&ProjectKey::new("b2", "https://r/2")));
    }
}
