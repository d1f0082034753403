use orion_configuration::config::{
    deserialize_yaml, network_filters::http_connection_manager::RouteSpecifier, Config, ListenerUpdate,
};
use std::path::PathBuf;

#[test]
fn server_config() {
    let cfg: Config = deserialize_yaml(&PathBuf::from("tests/server.yaml")).unwrap();
    assert!(cfg.bootstrap.validate().is_ok());
    assert_eq!(cfg.bootstrap.servers.len(), 1);
    assert_eq!(cfg.bootstrap.certificate_providers.len(), 1);
    let listener = cfg.bootstrap.static_resources.listeners[0].clone();
    let update = ListenerUpdate::try_from(listener).unwrap();
    assert_eq!(update.rds_names().into_iter().collect::<Vec<_>>(), vec!["greeter_routes"]);
    let chain = update.default_filter_chain.unwrap();
    assert!(matches!(chain.http_connection_manager.route_specifier, RouteSpecifier::RouteConfig(_)));
    assert_eq!(cfg.bootstrap.static_resources.route_configurations[0].name, "greeter_routes");
}

#[test]
fn bad_config() {
    let r: Result<Config, _> = deserialize_yaml(&PathBuf::from("tests/config_bad.yaml"));
    assert!(r.is_err());
}
