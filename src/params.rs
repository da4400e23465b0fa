// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Named camera settings.
//!
//! Parameters are an opaque string map owned by the client. The HAL reads the
//! sizes, formats and the handful of sensor settings it applies; every other
//! key is stored and handed back untouched.

use crate::{driver::SensorParm, Error};
use std::{collections::BTreeMap, fmt};

pub const KEY_PREVIEW_SIZE: &str = "preview-size";
pub const KEY_PREVIEW_FORMAT: &str = "preview-format";
pub const KEY_PICTURE_SIZE: &str = "picture-size";
pub const KEY_PICTURE_FORMAT: &str = "picture-format";
pub const KEY_JPEG_THUMBNAIL_WIDTH: &str = "jpeg-thumbnail-width";
pub const KEY_JPEG_THUMBNAIL_HEIGHT: &str = "jpeg-thumbnail-height";
pub const KEY_EFFECT: &str = "effect";
pub const KEY_WHITE_BALANCE: &str = "whitebalance";
pub const KEY_ANTIBANDING: &str = "antibanding";
pub const KEY_BRIGHTNESS: &str = "exposure-offset";
pub const KEY_ZOOM: &str = "zoom";

pub const PIXEL_FORMAT_YUV420SP: &str = "yuv420sp";
pub const PIXEL_FORMAT_JPEG: &str = "jpeg";

pub const DEFAULT_PREVIEW_WIDTH: u32 = 480;
pub const DEFAULT_PREVIEW_HEIGHT: u32 = 320;
pub const DEFAULT_PICTURE_WIDTH: u32 = 2048;
pub const DEFAULT_PICTURE_HEIGHT: u32 = 1536;
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 512;
pub const DEFAULT_THUMBNAIL_HEIGHT: u32 = 384;
pub const DEFAULT_BRIGHTNESS: i32 = 3;

/// Largest width or height the driver's dimension record can carry.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Largest brightness step the sensor accepts.
pub const MAX_BRIGHTNESS: i32 = 6;

const EFFECTS: &[(&str, i32)] = &[
    ("none", 0),
    ("mono", 1),
    ("negative", 2),
    ("solarize", 3),
    ("pastel", 4),
    ("mosaic", 5),
    ("resize", 6),
    ("sepia", 7),
    ("posterize", 8),
    ("whiteboard", 9),
    ("blackboard", 10),
    ("aqua", 11),
];

const WHITE_BALANCE: &[(&str, i32)] = &[
    ("auto", 1),
    ("custom", 2),
    ("incandescent", 3),
    ("fluorescent", 4),
    ("daylight", 5),
    ("cloudy", 6),
    ("twilight", 7),
    ("shade", 8),
];

const ANTIBANDING: &[(&str, i32)] = &[("off", 0), ("60hz", 1), ("50hz", 2), ("auto", 3)];

fn lookup(table: &[(&str, i32)], name: &str) -> Option<i32> {
    table.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
}

/// Sensor value for a named setting, if the sensor knows it.
pub fn sensor_value(parm: SensorParm, name: &str) -> Option<i32> {
    match parm {
        SensorParm::Effect => lookup(EFFECTS, name),
        SensorParm::WhiteBalance => lookup(WHITE_BALANCE, name),
        SensorParm::Antibanding => lookup(ANTIBANDING, name),
        SensorParm::Brightness => name
            .parse()
            .ok()
            .filter(|v| (0..=MAX_BRIGHTNESS).contains(v)),
    }
}

fn parm_key(parm: SensorParm) -> &'static str {
    match parm {
        SensorParm::Effect => KEY_EFFECT,
        SensorParm::WhiteBalance => KEY_WHITE_BALANCE,
        SensorParm::Antibanding => KEY_ANTIBANDING,
        SensorParm::Brightness => KEY_BRIGHTNESS,
    }
}

const SENSOR_PARMS: [SensorParm; 4] = [
    SensorParm::Effect,
    SensorParm::WhiteBalance,
    SensorParm::Antibanding,
    SensorParm::Brightness,
];

fn size_in_range(width: u32, height: u32) -> Option<(u32, u32)> {
    let range = 1..=MAX_DIMENSION;
    (range.contains(&width) && range.contains(&height)).then_some((width, height))
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    size_in_range(w.trim().parse().ok()?, h.trim().parse().ok()?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraParameters {
    values: BTreeMap<String, String>,
}

impl Default for CameraParameters {
    fn default() -> Self {
        let mut params = Self {
            values: BTreeMap::new(),
        };
        params.set_preview_size(DEFAULT_PREVIEW_WIDTH, DEFAULT_PREVIEW_HEIGHT);
        params.set(KEY_PREVIEW_FORMAT, PIXEL_FORMAT_YUV420SP);
        params.set_picture_size(DEFAULT_PICTURE_WIDTH, DEFAULT_PICTURE_HEIGHT);
        params.set(KEY_PICTURE_FORMAT, PIXEL_FORMAT_JPEG);
        params.set_int(KEY_JPEG_THUMBNAIL_WIDTH, DEFAULT_THUMBNAIL_WIDTH as i32);
        params.set_int(KEY_JPEG_THUMBNAIL_HEIGHT, DEFAULT_THUMBNAIL_HEIGHT as i32);
        params.set(KEY_EFFECT, "none");
        params.set(KEY_WHITE_BALANCE, "auto");
        params.set(KEY_ANTIBANDING, "off");
        params.set_int(KEY_BRIGHTNESS, DEFAULT_BRIGHTNESS);
        params.set_int(KEY_ZOOM, 0);
        params
    }
}

impl CameraParameters {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn set_int(&mut self, key: &str, value: i32) {
        self.set(key, &value.to_string());
    }

    pub fn preview_size(&self) -> Option<(u32, u32)> {
        parse_size(self.get(KEY_PREVIEW_SIZE)?)
    }

    pub fn set_preview_size(&mut self, width: u32, height: u32) {
        self.set(KEY_PREVIEW_SIZE, &format!("{width}x{height}"));
    }

    pub fn picture_size(&self) -> Option<(u32, u32)> {
        parse_size(self.get(KEY_PICTURE_SIZE)?)
    }

    pub fn set_picture_size(&mut self, width: u32, height: u32) {
        self.set(KEY_PICTURE_SIZE, &format!("{width}x{height}"));
    }

    pub fn thumbnail_size(&self) -> Option<(u32, u32)> {
        let w = self.get_int(KEY_JPEG_THUMBNAIL_WIDTH)?;
        let h = self.get_int(KEY_JPEG_THUMBNAIL_HEIGHT)?;
        size_in_range(u32::try_from(w).ok()?, u32::try_from(h).ok()?)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Checks the keys the HAL consumes.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |key: &str| Error::InvalidParameter {
            key: key.to_string(),
            value: self.get(key).unwrap_or_default().to_string(),
        };
        self.preview_size().ok_or_else(|| invalid(KEY_PREVIEW_SIZE))?;
        self.picture_size().ok_or_else(|| invalid(KEY_PICTURE_SIZE))?;
        self.thumbnail_size()
            .ok_or_else(|| invalid(KEY_JPEG_THUMBNAIL_WIDTH))?;
        if self.get(KEY_PREVIEW_FORMAT) != Some(PIXEL_FORMAT_YUV420SP) {
            return Err(invalid(KEY_PREVIEW_FORMAT));
        }
        if self.get(KEY_PICTURE_FORMAT) != Some(PIXEL_FORMAT_JPEG) {
            return Err(invalid(KEY_PICTURE_FORMAT));
        }
        for parm in SENSOR_PARMS {
            if let Some(value) = self.get(parm_key(parm)) {
                sensor_value(parm, value).ok_or_else(|| invalid(parm_key(parm)))?;
            }
        }
        if let Some(zoom) = self.get(KEY_ZOOM) {
            zoom.trim()
                .parse::<i32>()
                .map_err(|_| invalid(KEY_ZOOM))?;
        }
        Ok(())
    }

    /// Sensor settings whose value differs from `previous`.
    pub fn sensor_changes(&self, previous: &CameraParameters) -> Vec<(SensorParm, i32)> {
        SENSOR_PARMS
            .into_iter()
            .filter_map(|parm| {
                let key = parm_key(parm);
                let value = self.get(key)?;
                if previous.get(key) == Some(value) {
                    return None;
                }
                sensor_value(parm, value).map(|v| (parm, v))
            })
            .collect()
    }

    /// All sensor settings, for applying when the device opens.
    pub fn sensor_settings(&self) -> Vec<(SensorParm, i32)> {
        SENSOR_PARMS
            .into_iter()
            .filter_map(|parm| sensor_value(parm, self.get(parm_key(parm))?).map(|v| (parm, v)))
            .collect()
    }
}

impl fmt::Display for CameraParameters {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, (k, v)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = CameraParameters::default();
        params.validate().unwrap();
        assert_eq!(params.preview_size(), Some((480, 320)));
        assert_eq!(params.picture_size(), Some((2048, 1536)));
        assert_eq!(params.thumbnail_size(), Some((512, 384)));
        assert_eq!(params.get_int(KEY_BRIGHTNESS), Some(3));
    }

    #[test]
    fn bad_sizes_are_rejected() {
        let mut params = CameraParameters::default();
        params.set(KEY_PREVIEW_SIZE, "640by480");
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter { key, .. }) if key == KEY_PREVIEW_SIZE
        ));
        params.set(KEY_PREVIEW_SIZE, "0x480");
        assert!(params.validate().is_err());
    }

    #[test]
    fn sizes_beyond_the_driver_record_are_rejected() {
        let mut params = CameraParameters::default();
        params.set_preview_size(u32::MAX, u32::MAX);
        assert_eq!(params.preview_size(), None);
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter { key, value })
                if key == KEY_PREVIEW_SIZE && value == "4294967295x4294967295"
        ));

        params.set_preview_size(MAX_DIMENSION, MAX_DIMENSION);
        params.set_picture_size(MAX_DIMENSION + 1, 480);
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter { key, .. }) if key == KEY_PICTURE_SIZE
        ));

        params.set_picture_size(640, 480);
        params.set_int(KEY_JPEG_THUMBNAIL_WIDTH, 70000);
        assert!(matches!(
            params.validate(),
            Err(Error::InvalidParameter { key, .. }) if key == KEY_JPEG_THUMBNAIL_WIDTH
        ));

        params.set_int(KEY_JPEG_THUMBNAIL_WIDTH, 320);
        params.validate().unwrap();
        assert_eq!(params.preview_size(), Some((MAX_DIMENSION, MAX_DIMENSION)));
    }

    #[test]
    fn unknown_keys_pass_through() {
        let mut params = CameraParameters::default();
        params.set("vendor-thing", "42");
        params.validate().unwrap();
        assert_eq!(params.get_int("vendor-thing"), Some(42));
    }

    #[test]
    fn only_changed_sensor_settings_are_reported() {
        let previous = CameraParameters::default();
        let mut params = previous.clone();
        params.set(KEY_EFFECT, "sepia");
        params.set_int(KEY_BRIGHTNESS, 3);
        assert_eq!(params.sensor_changes(&previous), vec![(SensorParm::Effect, 7)]);

        params.set(KEY_WHITE_BALANCE, "moonlight");
        assert!(params.validate().is_err());
    }
}
