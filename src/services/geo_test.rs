use super::*;

const DELHI: Coordinates = Coordinates { lat: 28.7041, lng: 77.1025 };

#[test]
fn distance_to_self_is_zero() {
    assert!(distance_m(DELHI, DELHI).abs() < f64::EPSILON);
}

#[test]
fn distance_is_symmetric() {
    let pairs = [
        (DELHI, Coordinates::new(28.71, 77.11)),
        (DELHI, Coordinates::new(28.90, 77.30)),
        (Coordinates::new(-33.8688, 151.2093), Coordinates::new(51.5074, -0.1278)),
        (Coordinates::new(0.0, 179.9), Coordinates::new(0.0, -179.9)),
    ];
    for (a, b) in pairs {
        assert!((distance_m(a, b) - distance_m(b, a)).abs() < f64::EPSILON, "{a:?} <-> {b:?}");
    }
}

#[test]
fn distance_is_whole_meters() {
    let d = distance_m(DELHI, Coordinates::new(28.71, 77.11));
    assert!((d - d.round()).abs() < f64::EPSILON);
    assert!((900.0..1100.0).contains(&d), "got {d}");
}

#[test]
fn one_degree_of_latitude_is_about_111_km() {
    let d = distance_m(Coordinates::new(0.0, 0.0), Coordinates::new(1.0, 0.0));
    assert!((d - 111_195.0).abs() < 2.0, "got {d}");
}

#[test]
fn antimeridian_pair_is_close() {
    let d = distance_m(Coordinates::new(0.0, 179.9), Coordinates::new(0.0, -179.9));
    assert!(d < 25_000.0, "got {d}");
}

#[test]
fn due_north_maps_to_n() {
    for km in [0.1, 1.0, 14.0, 400.0] {
        let north = Coordinates::new(DELHI.lat + km / 111.195, DELHI.lng);
        assert_eq!(CompassPoint::from_bearing(bearing_deg(DELHI, north)), CompassPoint::N);
    }
}

#[test]
fn cardinal_bearings_map_to_expected_points() {
    let south = Coordinates::new(DELHI.lat - 0.05, DELHI.lng);
    let east = Coordinates::new(DELHI.lat, DELHI.lng + 0.05);
    let west = Coordinates::new(DELHI.lat, DELHI.lng - 0.05);
    assert_eq!(CompassPoint::from_bearing(bearing_deg(DELHI, south)), CompassPoint::S);
    assert_eq!(CompassPoint::from_bearing(bearing_deg(DELHI, east)), CompassPoint::E);
    assert_eq!(CompassPoint::from_bearing(bearing_deg(DELHI, west)), CompassPoint::W);
}

#[test]
fn compass_sector_rounding() {
    assert_eq!(CompassPoint::from_bearing(0.0), CompassPoint::N);
    assert_eq!(CompassPoint::from_bearing(22.4), CompassPoint::N);
    assert_eq!(CompassPoint::from_bearing(22.6), CompassPoint::NE);
    assert_eq!(CompassPoint::from_bearing(135.0), CompassPoint::SE);
    assert_eq!(CompassPoint::from_bearing(225.0), CompassPoint::SW);
    assert_eq!(CompassPoint::from_bearing(315.0), CompassPoint::NW);
    assert_eq!(CompassPoint::from_bearing(350.0), CompassPoint::N);
    assert_eq!(CompassPoint::from_bearing(359.9), CompassPoint::N);
}

#[test]
fn compass_serializes_as_abbreviation() {
    assert_eq!(serde_json::to_string(&CompassPoint::SW).unwrap(), "\"SW\"");
    assert_eq!(CompassPoint::NE.to_string(), "NE");
}

#[test]
fn coordinate_bounds() {
    assert!(Coordinates::new(90.0, 180.0).is_valid());
    assert!(Coordinates::new(-90.0, -180.0).is_valid());
    assert!(!Coordinates::new(90.1, 0.0).is_valid());
    assert!(!Coordinates::new(0.0, -180.5).is_valid());
    assert!(!Coordinates::new(f64::NAN, 0.0).is_valid());
    assert!(!Coordinates::new(0.0, f64::INFINITY).is_valid());
}

#[test]
fn distance_labels() {
    assert_eq!(format_distance(0.0), "0 m");
    assert_eq!(format_distance(850.0), "850 m");
    assert_eq!(format_distance(999.0), "999 m");
    assert_eq!(format_distance(1000.0), "1.0 km");
    assert_eq!(format_distance(1234.0), "1.2 km");
    assert_eq!(format_distance(14_960.0), "15.0 km");
}
