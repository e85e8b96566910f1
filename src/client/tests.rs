use super::*;

#[test]
fn test_client_requires_endpoints() {
    let result = Client::new(Vec::<String>::new(), ClientConfig::default());
    assert!(matches!(result, Err(ClientError::Endpoints(_))));
}

#[test]
fn test_paths() {
    assert_eq!(app_path("APP"), "apps/APP");
    assert_eq!(app_instance_path("APP", "i-1"), "apps/APP/i-1");
    assert_eq!(
        status_path("APP", "i-1", Status::OutOfService),
        "apps/APP/i-1/status?value=OUT_OF_SERVICE"
    );
}
