// ABOUTME: Integration tests for configuration parsing and validation.
// ABOUTME: Tests YAML parsing, env-backed values, discovery, and destination merging.

use ferry::config::*;
use ferry::error::Error;
use std::time::Duration;

const MINIMAL: &str = r#"
registry:
  repository: ghcr.io/org/web
workloads:
  - name: web
    replicas: 3
"#;

mod parsing {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = Config::from_yaml(MINIMAL).unwrap();

        let web = config.workloads.first();
        assert_eq!(web.name.as_str(), "web");
        assert_eq!(web.namespace.as_str(), "default");
        assert_eq!(web.replicas, 3);
        assert_eq!(web.max_surge, 1);
        assert_eq!(web.max_unavailable, 0);
        assert_eq!(web.readiness_timeout, Duration::from_secs(300));

        assert_eq!(config.registry.tag_template, BUILD_PLACEHOLDER);
        assert_eq!(config.cluster.endpoint, ClusterEndpoint::default());
        assert_eq!(config.rollout.poll_interval, Duration::from_secs(5));
        assert_eq!(config.rollout.stall_after_polls, 12);
        assert!(config.rollout.rollback);
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
cluster:
  endpoint: tcp://10.0.0.5:2375
  timeout: 10s
registry:
  repository: ghcr.io/org/web
  tag_template: "sha-{build}"
  wait_window: 2m
  poll_interval: 3s
rollout:
  poll_interval: 2s
  stall_after_polls: 5
  rollback: false
  mutation_retries: 2
  backoff_base: 500ms
  backoff_max: 10s
workloads:
  - name: web
    namespace: shop
    replicas: 4
    max_surge: 2
    max_unavailable: 1
    readiness_timeout: 90s
    env:
      RUST_LOG: info
    labels:
      team: storefront
    healthcheck:
      cmd: curl -f http://localhost:8080/health
  - name: worker
    namespace: shop
    replicas: 2
    max_surge: 0
    max_unavailable: 1
state_dir: /var/lib/ferry
"#;
        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(
            config.cluster.endpoint,
            ClusterEndpoint::Http("http://10.0.0.5:2375".to_string())
        );
        assert_eq!(config.cluster.timeout, Duration::from_secs(10));
        assert_eq!(config.registry.wait_window, Duration::from_secs(120));
        assert_eq!(config.rollout.backoff_base, Duration::from_millis(500));
        assert!(!config.rollout.rollback);
        assert_eq!(config.workloads.len(), 2);
        assert_eq!(config.state_dir.to_str(), Some("/var/lib/ferry"));

        let web = config.workloads.first().to_workload().unwrap();
        assert_eq!(web.key.to_string(), "shop/web");
        assert_eq!(web.desired, 4);
        assert_eq!(web.strategy.max_surge, 2);
        assert_eq!(web.strategy.readiness_timeout, Duration::from_secs(90));
        assert_eq!(web.template.env.get("RUST_LOG").map(String::as_str), Some("info"));
        assert!(web.template.healthcheck.is_some());
    }

    #[test]
    fn same_name_in_different_namespaces_is_allowed() {
        let yaml = r#"
registry:
  repository: web
workloads:
  - name: web
    replicas: 1
  - name: web
    namespace: staging
    replicas: 1
"#;
        assert_eq!(Config::from_yaml(yaml).unwrap().workloads.len(), 2);
    }
}

mod validation {
    use super::*;

    fn invalid(yaml: &str) -> String {
        Config::from_yaml(yaml).unwrap_err().to_string()
    }

    #[test]
    fn empty_workload_list_is_rejected() {
        let message = invalid("registry:\n  repository: web\nworkloads: []\n");
        assert!(message.contains("at least one workload"), "{}", message);
    }

    #[test]
    fn duplicate_workloads_are_rejected() {
        let yaml = r#"
registry:
  repository: web
workloads:
  - name: web
    replicas: 1
  - name: web
    replicas: 2
"#;
        assert!(invalid(yaml).contains("duplicate workload: default/web"));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let yaml = r#"
registry:
  repository: web
workloads:
  - name: web
    replicas: 2
    max_surge: 0
    max_unavailable: 0
"#;
        assert!(invalid(yaml).contains("cannot both be zero"));
    }

    #[test]
    fn zero_replicas_are_rejected() {
        let yaml = r#"
registry:
  repository: web
workloads:
  - name: web
    replicas: 0
"#;
        assert!(invalid(yaml).contains("at least 1"));
    }

    #[test]
    fn uppercase_workload_name_is_rejected() {
        let yaml = r#"
registry:
  repository: web
workloads:
  - name: Web
    replicas: 1
"#;
        assert!(invalid(yaml).contains("lowercase"));
    }

    #[test]
    fn tag_template_needs_placeholder() {
        let yaml = r#"
registry:
  repository: web
  tag_template: latest
workloads:
  - name: web
    replicas: 1
"#;
        assert!(invalid(yaml).contains("{build}"));
    }

    #[test]
    fn username_without_password_is_rejected() {
        let yaml = r#"
registry:
  repository: web
  username: deploy
workloads:
  - name: web
    replicas: 1
"#;
        assert!(invalid(yaml).contains("set together"));
    }

    #[test]
    fn unsupported_endpoint_is_rejected() {
        let yaml = r#"
cluster:
  endpoint: ssh://deploy@host
registry:
  repository: web
workloads:
  - name: web
    replicas: 1
"#;
        assert!(invalid(yaml).contains("unsupported endpoint scheme"));
    }
}

mod environment {
    use super::*;

    #[test]
    fn env_values_resolve_from_environment() {
        let yaml = r#"
registry:
  repository: web
workloads:
  - name: web
    replicas: 1
    env:
      MODE: production
      TOKEN: { env: FERRY_TEST_TOKEN }
      REGION: { env: FERRY_TEST_UNSET_REGION, default: eu-west-1 }
"#;
        let config = Config::from_yaml(yaml).unwrap();

        temp_env::with_vars(
            [
                ("FERRY_TEST_TOKEN", Some("s3cret")),
                ("FERRY_TEST_UNSET_REGION", None),
            ],
            || {
                let web = config.workloads.first().to_workload().unwrap();
                let env = &web.template.env;
                assert_eq!(env.get("MODE").map(String::as_str), Some("production"));
                assert_eq!(env.get("TOKEN").map(String::as_str), Some("s3cret"));
                assert_eq!(env.get("REGION").map(String::as_str), Some("eu-west-1"));
            },
        );
    }

    #[test]
    fn missing_env_value_fails_workload_conversion() {
        let yaml = r#"
registry:
  repository: web
workloads:
  - name: web
    replicas: 1
    env:
      TOKEN: { env: FERRY_TEST_MISSING_TOKEN }
"#;
        let config = Config::from_yaml(yaml).unwrap();

        temp_env::with_var_unset("FERRY_TEST_MISSING_TOKEN", || {
            assert!(matches!(
                config.workloads.first().to_workload(),
                Err(Error::MissingEnvVar(var)) if var == "FERRY_TEST_MISSING_TOKEN"
            ));
        });
    }

    #[test]
    fn registry_credentials_resolve_from_environment() {
        let yaml = r#"
registry:
  repository: ghcr.io/org/web
  username: { env: FERRY_TEST_REGISTRY_USER }
  password: { env: FERRY_TEST_REGISTRY_PASSWORD }
workloads:
  - name: web
    replicas: 1
"#;
        let config = Config::from_yaml(yaml).unwrap();

        temp_env::with_vars(
            [
                ("FERRY_TEST_REGISTRY_USER", Some("deploy")),
                ("FERRY_TEST_REGISTRY_PASSWORD", Some("hunter2")),
            ],
            || {
                let credentials = config.registry.credentials().unwrap().unwrap();
                assert_eq!(credentials.username, "deploy");
                assert_eq!(credentials.password, "hunter2");
                assert!(!format!("{:?}", credentials).contains("hunter2"));
            },
        );
    }

    #[test]
    fn no_credentials_configured() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.registry.credentials().unwrap(), None);
    }
}

mod destinations {
    use super::*;

    const WITH_DESTINATIONS: &str = r#"
registry:
  repository: ghcr.io/org/web
workloads:
  - name: web
    replicas: 2
  - name: worker
    replicas: 1
destinations:
  production:
    cluster:
      endpoint: tcp://prod.internal:2375
    replicas:
      web: 8
    state_dir: /srv/ferry
"#;

    #[test]
    fn destination_overrides_cluster_and_replicas() {
        let config = Config::from_yaml(WITH_DESTINATIONS).unwrap();
        let prod = config.for_destination("production").unwrap();

        assert_eq!(
            prod.cluster.endpoint,
            ClusterEndpoint::Http("http://prod.internal:2375".to_string())
        );
        let replicas: Vec<u32> = prod.workloads.iter().map(|w| w.replicas).collect();
        assert_eq!(replicas, vec![8, 1]);
        assert_eq!(prod.state_dir.to_str(), Some("/srv/ferry"));
        assert_eq!(prod.registry.repository, config.registry.repository);
    }

    #[test]
    fn unknown_destination_fails() {
        let config = Config::from_yaml(WITH_DESTINATIONS).unwrap();
        assert!(matches!(
            config.for_destination("staging"),
            Err(Error::UnknownDestination(name)) if name == "staging"
        ));
    }

    #[test]
    fn select_workloads_by_name() {
        let config = Config::from_yaml(WITH_DESTINATIONS).unwrap();

        assert_eq!(config.select_workloads(&[]).unwrap().len(), 2);
        let picked = config.select_workloads(&["worker".to_string()]).unwrap();
        assert_eq!(picked[0].name.as_str(), "worker");
        assert!(matches!(
            config.select_workloads(&["ghost".to_string()]),
            Err(Error::UnknownWorkload(_))
        ));
    }
}

mod discovery {
    use super::*;
    use std::fs;

    #[test]
    fn finds_config_and_anchors_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME), MINIMAL).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.state_dir, dir.path().join(".ferry/state"));
    }

    #[test]
    fn finds_config_in_dot_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".ferry")).unwrap();
        fs::write(dir.path().join(CONFIG_FILENAME_DIR), MINIMAL).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.state_dir, dir.path().join(".ferry/state"));
    }

    #[test]
    fn missing_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::discover(dir.path()),
            Err(Error::ConfigNotFound(_))
        ));
    }

    #[test]
    fn init_writes_a_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        init_config(dir.path(), Some("api"), Some("ghcr.io/org/api"), false).unwrap();

        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.workloads.first().name.as_str(), "api");
        assert_eq!(config.registry.repository.name(), "org/api");

        assert!(matches!(
            init_config(dir.path(), None, None, false),
            Err(Error::AlreadyExists(_))
        ));
        init_config(dir.path(), None, None, true).unwrap();
    }
}
