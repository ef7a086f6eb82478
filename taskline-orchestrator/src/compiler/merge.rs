//! Merge utilities
//!
//! Job configuration reaches the compiler from three places: the catalog,
//! the stored workflow and the trigger arguments. These helpers combine
//! them item by item, matching items through a key-extraction closure.

use std::collections::HashMap;
use std::hash::Hash;

use taskline_core::domain::common::{KeyVal, Repository};

use super::env::render_env;

/// Applies `merge` to every base item that has an overlay item with the same key
///
/// Base order and membership are kept; overlay items without a base
/// counterpart are ignored.
pub fn overlay_by_key<T, K, F, M>(mut base: Vec<T>, overlay: &[T], key: F, merge: M) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
    M: Fn(&mut T, &T),
{
    let overlay: HashMap<K, &T> = overlay.iter().map(|item| (key(item), item)).collect();
    for item in base.iter_mut() {
        if let Some(other) = overlay.get(&key(item)) {
            merge(item, other);
        }
    }
    base
}

/// Keeps the pool items whose key appears in `selected`, merging each with
/// its selected counterpart
///
/// The result follows pool order, so a selection can never introduce
/// items the pool does not offer.
pub fn select_by_key<T, K, F, M>(pool: Vec<T>, selected: &[T], key: F, merge: M) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
    M: Fn(T, &T) -> T,
{
    let selected: HashMap<K, &T> = selected.iter().map(|item| (key(item), item)).collect();
    pool.into_iter()
        .filter_map(|item| {
            let other = selected.get(&key(&item))?;
            Some(merge(item, other))
        })
        .collect()
}

/// Takes the keys and settings of `origin` and the values of `input`
///
/// Credential flags, types and choice options always come from `origin`.
pub fn render_key_vals(input: &[KeyVal], origin: &[KeyVal]) -> Vec<KeyVal> {
    overlay_by_key(
        origin.to_vec(),
        input,
        |kv| kv.key.clone(),
        |item, input| item.value = input.value.clone(),
    )
}

/// Copies the user-selectable refs of `custom` onto matching template repos
pub fn merge_repos(template: &[Repository], custom: &[Repository]) -> Vec<Repository> {
    let template = template
        .iter()
        .cloned()
        .map(|mut repo| {
            if repo.repo_namespace.is_empty() {
                repo.repo_namespace = repo.repo_owner.clone();
            }
            repo
        })
        .collect();

    overlay_by_key(template, custom, Repository::merge_key, |repo, custom| {
        repo.branch = custom.branch.clone();
        repo.tag = custom.tag.clone();
        repo.pr = custom.pr;
        repo.prs = custom.prs.clone();
        repo.filter_regexp = custom.filter_regexp.clone();
    })
}

/// Replaces origin repos with the matching input repo, rendering its
/// checkout path against `kvs`
pub fn render_repos(input: &[Repository], origin: &[Repository], kvs: &[KeyVal]) -> Vec<Repository> {
    origin
        .iter()
        .map(|origin_repo| {
            let Some(input_repo) = input.iter().find(|r| {
                r.repo_name == origin_repo.repo_name && r.repo_owner == origin_repo.repo_owner
            }) else {
                return origin_repo.clone();
            };
            let mut repo = input_repo.clone();
            repo.checkout_path = render_env(&repo.checkout_path, kvs);
            if repo.remote_name.is_empty() {
                repo.remote_name = "origin".to_string();
            }
            repo
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(owner: &str, name: &str, branch: &str) -> Repository {
        Repository {
            source: "gitlab".to_string(),
            repo_owner: owner.to_string(),
            repo_name: name.to_string(),
            branch: branch.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_key_vals_keeps_origin_settings() {
        let origin = vec![
            KeyVal::credential("TOKEN", "default"),
            KeyVal::new("LEVEL", "info"),
        ];
        let input = vec![KeyVal::new("TOKEN", "abc"), KeyVal::new("EXTRA", "x")];

        let rendered = render_key_vals(&input, &origin);

        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].value, "abc");
        assert!(rendered[0].is_credential);
        assert_eq!(rendered[1].value, "info");
    }

    #[test]
    fn test_merge_repos_overlays_refs_only() {
        let mut template = repo("team", "api", "main");
        template.checkout_path = "src".to_string();
        let mut custom = repo("team", "api", "feature");
        custom.pr = 42;
        custom.checkout_path = "ignored".to_string();

        let merged = merge_repos(&[template], &[custom, repo("team", "web", "dev")]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].branch, "feature");
        assert_eq!(merged[0].pr, 42);
        assert_eq!(merged[0].checkout_path, "src");
        assert_eq!(merged[0].repo_namespace, "team");
    }

    #[test]
    fn test_select_by_key_follows_pool_order() {
        let pool = vec![("a", 1), ("b", 2), ("c", 3)];
        let selected = vec![("c", 30), ("a", 10), ("z", 0)];

        let result = select_by_key(pool, &selected, |item| item.0, |item, sel| (item.0, sel.1));

        assert_eq!(result, vec![("a", 10), ("c", 30)]);
    }

    #[test]
    fn test_render_repos_defaults_remote_and_renders_path() {
        let origin = vec![repo("team", "api", "main"), repo("team", "web", "main")];
        let mut input = repo("team", "api", "release");
        input.checkout_path = "$SERVICE/src".to_string();

        let rendered = render_repos(&[input], &origin, &[KeyVal::new("SERVICE", "api")]);

        assert_eq!(rendered[0].branch, "release");
        assert_eq!(rendered[0].checkout_path, "api/src");
        assert_eq!(rendered[0].remote_name, "origin");
        assert_eq!(rendered[1].branch, "main");
    }
}
