#[cfg(test)]
mod tests {
    use crate::prefs::PreferenceStore;

    #[tokio::test]
    async fn test_values_survive_reload() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("prefs.json");

        {
            let prefs = PreferenceStore::load(path.clone())
                .await
                .expect("Failed to load preferences");
            prefs.set_dark_mode(true).await.expect("Failed to set");
            prefs.set_current_user(7).await.expect("Failed to set");
            prefs.set_step_goal(7, 9000).await.expect("Failed to set");
        }

        let reloaded = PreferenceStore::load(path)
            .await
            .expect("Failed to reload preferences");
        assert!(reloaded.dark_mode());
        assert_eq!(reloaded.current_user(), Some(7));
        assert_eq!(reloaded.step_goal(7), Some(9000));
        assert_eq!(reloaded.step_goal(8), None);
    }

    #[tokio::test]
    async fn test_session_watch_notifies() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let prefs = PreferenceStore::load(dir.path().join("prefs.json"))
            .await
            .expect("Failed to load preferences");

        let mut session_rx = prefs.watch_session();
        assert_eq!(*session_rx.borrow(), None);

        prefs.set_current_user(5).await.expect("Failed to set");
        session_rx.changed().await.expect("watch closed");
        assert_eq!(*session_rx.borrow_and_update(), Some(5));

        prefs.clear_current_user().await.expect("Failed to clear");
        session_rx.changed().await.expect("watch closed");
        assert_eq!(*session_rx.borrow_and_update(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("prefs.json");
        tokio::fs::write(&path, b"{not json")
            .await
            .expect("Failed to write file");

        let prefs = PreferenceStore::load(path)
            .await
            .expect("Failed to load preferences");
        assert!(!prefs.dark_mode());
        assert_eq!(prefs.current_user(), None);
    }
}
