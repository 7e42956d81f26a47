// End-to-end reconciliation against the sled store and the config writer
#[cfg(test)]
mod tests {
    use std::{path::Path, sync::Arc};

    use quay::{
        adapters::{ConfigRenderer, ConfigWriter, SledRouteStore},
        core::{ControlError, ControlPlane, Route},
    };
    use tempfile::TempDir;

    fn setup() -> (TempDir, TempDir, ControlPlane) {
        let data_dir = TempDir::new().unwrap();
        let conf_dir = TempDir::new().unwrap();
        let store = SledRouteStore::open(data_dir.path().join("routes.db")).unwrap();
        let control = ControlPlane::new(
            Arc::new(store),
            Arc::new(ConfigWriter::new(conf_dir.path())),
        );
        (data_dir, conf_dir, control)
    }

    fn conf_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".conf"))
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_route_lifecycle_is_mirrored_on_disk() {
        let (_data, conf_dir, control) = setup();

        control
            .create_route(Route::new("svc", 80, vec!["a.example.com".to_string()]))
            .await
            .unwrap();
        assert!(conf_names(conf_dir.path()).is_empty());

        control
            .set_backends("svc", vec!["10.0.0.1:9000".to_string()])
            .await
            .unwrap();
        assert_eq!(
            conf_names(conf_dir.path()),
            vec![ConfigRenderer::file_name("svc")]
        );

        control.set_backends("svc", Vec::new()).await.unwrap();
        assert!(conf_names(conf_dir.path()).is_empty());
        assert_eq!(control.get_route("svc").await.unwrap().port, 80);

        control.delete_route("svc").await.unwrap();
        assert!(matches!(
            control.get_route("svc").await,
            Err(ControlError::NotFound(_))
        ));

        control.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_repairs_tampered_directory() {
        let (_data, conf_dir, control) = setup();

        for (name, port) in [("alpha", 8080), ("beta", 8081)] {
            control
                .create_route(
                    Route::new(name, port, vec![format!("{name}.example.com")])
                        .with_backends(vec!["127.0.0.1:9000".to_string()]),
                )
                .await
                .unwrap();
        }
        assert_eq!(conf_names(conf_dir.path()).len(), 2);

        let alpha = conf_dir.path().join(ConfigRenderer::file_name("alpha"));
        std::fs::remove_file(&alpha).unwrap();
        std::fs::write(conf_dir.path().join("stray.conf"), "server {}\n").unwrap();

        assert_eq!(control.reconcile().await.unwrap(), 2);

        let mut expected = vec![
            ConfigRenderer::file_name("alpha"),
            ConfigRenderer::file_name("beta"),
        ];
        expected.sort();
        assert_eq!(conf_names(conf_dir.path()), expected);
        assert!(std::fs::read_to_string(alpha).unwrap().contains("listen 8080;"));
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let (_data, _conf, control) = setup();

        let route = Route::new("svc", 80, vec!["a.example.com".to_string()]);
        control.create_route(route.clone()).await.unwrap();

        let err = control.create_route(route).await.unwrap_err();
        assert!(matches!(err, ControlError::AlreadyExists(_)));
        assert_eq!(err.status_code(), http::StatusCode::CONFLICT);
    }
}
