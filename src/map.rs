use serde_json::{json, Value};

use crate::models::StudentRecord;

/// GeoJSON FeatureCollection of student hometowns for the map view.
pub fn hometowns_geojson(students: &[StudentRecord]) -> Value {
    let features: Vec<Value> = students
        .iter()
        .map(|student| {
            json!({
                "type": "Feature",
                "geometry": {
                    "type": "Point",
                    "coordinates": [student.hometown.longitude, student.hometown.latitude],
                },
                "properties": {
                    "name": format!("{} {}", student.first_name, student.last_name),
                    "faculty": student.faculty,
                    "city": student.hometown.city,
                },
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "features": features,
    })
}
