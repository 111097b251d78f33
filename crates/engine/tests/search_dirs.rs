//! File search over real directories.

use engine::AppContext;
use std::fs;

#[tokio::test]
async fn empty_directory_lists_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let ctx = AppContext::default();

    let paths = ctx.search().search(tmp.path(), "").await.unwrap();
    assert!(paths.is_empty());
}

#[tokio::test]
async fn three_files_listed_in_full() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["one.txt", "two.txt", "three.txt"] {
        fs::write(tmp.path().join(name), name).unwrap();
    }
    let ctx = AppContext::default();

    let paths = ctx.search().search(tmp.path(), "").await.unwrap();
    assert_eq!(paths.len(), 3);
    for name in ["one.txt", "two.txt", "three.txt"] {
        let expected = tmp.path().join(name).to_string_lossy().into_owned();
        assert!(paths.contains(&expected), "{} missing from {:?}", name, paths);
    }
}

#[tokio::test]
async fn fuzzy_query_ranks_best_match_first() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("src")).unwrap();
    fs::write(tmp.path().join("src").join("registry.rs"), "").unwrap();
    fs::write(tmp.path().join("README.md"), "").unwrap();
    let ctx = AppContext::default();

    let paths = ctx.search().search(tmp.path(), "registry").await.unwrap();
    assert!(paths[0].ends_with("registry.rs"), "{:?}", paths);
}

#[tokio::test]
async fn new_files_appear_after_invalidate() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("first.txt"), "").unwrap();
    let ctx = AppContext::default();

    assert_eq!(ctx.search().search(tmp.path(), "").await.unwrap().len(), 1);
    fs::write(tmp.path().join("second.txt"), "").unwrap();
    // Still served from the cache inside the TTL.
    assert_eq!(ctx.search().search(tmp.path(), "").await.unwrap().len(), 1);

    ctx.search().invalidate();
    assert_eq!(ctx.search().search(tmp.path(), "").await.unwrap().len(), 2);
}
