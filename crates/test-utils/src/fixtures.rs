//! Common test fixtures for obs-io tests.

/// Common assimilation windows for testing.
pub mod window {
    /// Six-hour window centred on 2018-04-15T00Z.
    pub const BEGIN: &str = "2018-04-14T21:00:00Z";
    pub const END: &str = "2018-04-15T03:00:00Z";

    /// Inside the window.
    pub const INSIDE: &str = "2018-04-15T00:00:00Z";

    /// Legacy `date_time` reference (YYYYMMDDhh) at the window centre.
    pub const REFERENCE: i64 = 2018041500;
}

/// Common (lon, lat) reference points.
pub mod points {
    pub const BOULDER: (f64, f64) = (-105.27, 40.01);
    pub const LONDON: (f64, f64) = (-0.1276, 51.5074);
    pub const PARIS: (f64, f64) = (2.3522, 48.8566);
    pub const ORIGIN: (f64, f64) = (0.0, 0.0);
    pub const ANTIMERIDIAN: (f64, f64) = (180.0, 0.0);
}

/// Common variable names.
pub mod vars {
    pub const LATITUDE: &str = "MetaData/latitude";
    pub const LONGITUDE: &str = "MetaData/longitude";
    pub const DATETIME: &str = "MetaData/dateTime";
    pub const STATION_ID: &str = "MetaData/stationIdentification";
    pub const BRIGHTNESS_TEMPERATURE: &str = "ObsValue/brightnessTemperature";
    pub const AIR_TEMPERATURE: &str = "ObsValue/airTemperature";
}
