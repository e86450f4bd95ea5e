use httptest::matchers::{all_of, contains, key, not, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::json;
use tempfile::tempdir;

use distance_extract::{
    count_rows, open_database, ApiKey, AppConfig, BingMapsClient, Destinations, Pipeline,
    RunRequest, Source, Strategy,
};

fn config_for(server: &Server, dir: &std::path::Path, batch_size: usize) -> AppConfig {
    AppConfig {
        database_path: dir.join("extract.db"),
        api_base_url: server.url_str("/REST/v1"),
        api_key_file: dir.join("BingMapsKey.txt"),
        route_batch_size: batch_size,
        http_timeout_secs: Some(5),
    }
}

fn leg(duration: f64, distance: f64) -> serde_json::Value {
    json!({ "travelDuration": duration, "travelDistance": distance })
}

#[tokio::test]
async fn batched_routes_persist_done_and_failed_batches() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/REST/v1/Routes/Driving"),
            request::query(url_decoded(contains(("wp.0", "A")))),
            request::query(url_decoded(contains(("wp.3", "D")))),
            request::query(url_decoded(contains(("key", "it-key")))),
        ])
        .respond_with(json_encoded(json!({
            "resourceSets": [{
                "resources": [{
                    "routeLegs": [leg(600.0, 10.5), leg(45.0, 0.7), leg(1200.0, 22.0)]
                }]
            }]
        }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/REST/v1/Routes/Driving"),
            request::query(url_decoded(contains(("wp.0", "E")))),
        ])
        .respond_with(status_code(500)),
    );

    let dir = tempdir().unwrap();
    let config = config_for(&server, dir.path(), 2);
    std::fs::write(&config.api_key_file, "it-key\n").unwrap();
    let csv_path = dir.path().join("routes.csv");
    std::fs::write(&csv_path, "Source,Destination\nA,B\nC,D\nE,F\n").unwrap();

    let client =
        BingMapsClient::new(&config, ApiKey::from_file(&config.api_key_file).unwrap()).unwrap();
    let mut connection = open_database(&config.database_path).unwrap();
    let request = RunRequest {
        source: Source::Csv(csv_path),
        past_query: None,
        destinations: Destinations {
            done_table: "DistanceDone".into(),
            error_table: "DistanceErrors".into(),
            export_dir: None,
        },
    };

    let summary = Pipeline::new(&mut connection, &client, config.route_batch_size, false)
        .run_routes(&request, Strategy::Batched)
        .await
        .unwrap();

    assert_eq!(summary.pending, 3);
    assert_eq!(summary.done, 2);
    assert_eq!(summary.error_indexes, vec![2]);
    assert_eq!(summary.messages, vec!["Errors at indexes: 2".to_string()]);

    let second_leg: (String, f64, f64) = connection
        .query_row(
            "SELECT KeyID, TravelDuration, TravelDistance FROM DistanceDone WHERE Source = 'C'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(second_leg, ("C+D".to_string(), 1200.0, 22.0));

    let failed: (String, String) = connection
        .query_row("SELECT Source, Destination FROM DistanceErrors", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .unwrap();
    assert_eq!(failed, ("E".to_string(), "F".to_string()));
    assert_eq!(count_rows(&connection, "DistanceErrors").unwrap(), 1);
}

#[tokio::test]
async fn segmented_geocode_writes_centroid_columns() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/REST/v1/Locations"),
            request::query(url_decoded(contains(key("addressLine")))),
            request::query(url_decoded(contains(("postalCode", "75001")))),
        ])
        .respond_with(json_encoded(json!({
            "resourceSets": [{
                "resources": [{
                    "point": { "type": "Point", "coordinates": [48.860611, 2.337644] },
                    "address": { "countryRegion": "France", "adminDistrict": "IdF" },
                    "confidence": "High"
                }]
            }]
        }))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/REST/v1/Locations"),
            request::query(url_decoded(not(contains(key("addressLine"))))),
            request::query(url_decoded(contains(("countryRegion", "France")))),
        ])
        .respond_with(status_code(404)),
    );

    let dir = tempdir().unwrap();
    let config = config_for(&server, dir.path(), 12);
    let client = BingMapsClient::new(&config, ApiKey::new("it-key").unwrap()).unwrap();
    let mut connection = open_database(&config.database_path).unwrap();
    connection
        .execute_batch(
            r#"
            CREATE TABLE Segmented (countryRegion TEXT, adminDistrict TEXT, locality TEXT,
                postalCode TEXT, addressLine TEXT);
            INSERT INTO Segmented VALUES ('France', 'IDF', 'Paris', '75001', 'Rue de Rivoli');
            "#,
        )
        .unwrap();

    let request = RunRequest {
        source: Source::Query("SELECT * FROM Segmented".into()),
        past_query: None,
        destinations: Destinations {
            done_table: "GeoDone".into(),
            error_table: "GeoErrors".into(),
            export_dir: Some(dir.path().join("out")),
        },
    };
    let summary = Pipeline::new(&mut connection, &client, 12, false)
        .run_segmented(&request)
        .await
        .unwrap();

    assert_eq!(summary.done, 1);
    assert!(summary.messages.is_empty());

    let row: (f64, f64, String, String, f64, f64) = connection
        .query_row(
            "SELECT Latitude, Longitude, Country_check, Admdist_check,
                    Country_check_latitude, Admdist_check_latitude FROM GeoDone",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .unwrap();
    assert_eq!(
        row,
        (48.8606, 2.3376, "France".into(), "IdF".into(), 0.0, 0.0)
    );

    let exported = std::fs::read_to_string(dir.path().join("out").join("done.csv")).unwrap();
    assert!(exported.starts_with("countryRegion,adminDistrict,locality,postalCode,addressLine,"));
    assert_eq!(count_rows(&connection, "GeoErrors").unwrap(), 0);
}
