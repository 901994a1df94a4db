//! Tap targets and OCR boxes of the game UI
//!
//! Positions are tuned in pixels on a reference screen but kept as fractions
//! of the screen size, so one table serves every device resolution. The
//! worker resolves the table once per run, after it has learned the real
//! screen size.

use hw_vision::{Point, Region, Resolution};
use serde::{Deserialize, Serialize};

use crate::config::BroadcastChannel;
use crate::error::ConfigError;

/// Position as a fraction of screen width and height
#[derive(Debug, Clone, Copy, PartialEq)]
struct Anchor {
    x: f64,
    y: f64,
}

impl Anchor {
    fn from_pixels(point: Point, reference: Resolution) -> Self {
        Self {
            x: point.x as f64 / reference.width as f64,
            y: point.y as f64 / reference.height as f64,
        }
    }

    fn to_pixels(self, device: Resolution) -> Point {
        Point::new(
            scale(self.x, device.width).min(device.width.saturating_sub(1)),
            scale(self.y, device.height).min(device.height.saturating_sub(1)),
        )
    }
}

/// Rectangle as fractions of screen width and height
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    top_left: Anchor,
    bottom_right: Anchor,
}

impl Span {
    fn from_pixels(region: Region, reference: Resolution) -> Self {
        Self {
            top_left: Anchor::from_pixels(Point::new(region.left, region.top), reference),
            bottom_right: Anchor::from_pixels(Point::new(region.right, region.bottom), reference),
        }
    }

    fn to_pixels(self, device: Resolution) -> Region {
        Region::new(
            scale(self.top_left.x, device.width),
            scale(self.top_left.y, device.height),
            scale(self.bottom_right.x, device.width).min(device.width),
            scale(self.bottom_right.y, device.height).min(device.height),
        )
    }
}

fn scale(fraction: f64, extent: u32) -> u32 {
    (fraction * extent as f64).round().max(0.0) as u32
}

/// Pixel table as written in configuration files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutTable {
    /// Screen the pixel values were measured on
    pub reference: Resolution,
    pub refresh: Point,
    pub share: Point,
    pub alliance_channel: Point,
    pub alliance_confirm: Point,
    pub world_channel: Point,
    pub world_confirm: Point,
    /// Truck strength text
    pub strength: Region,
    /// Server number text
    pub server: Region,
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self {
            reference: Resolution::REFERENCE,
            refresh: Point::new(680, 70),
            share: Point::new(450, 1100),
            alliance_channel: Point::new(300, 700),
            alliance_confirm: Point::new(400, 750),
            world_channel: Point::new(300, 450),
            world_confirm: Point::new(400, 750),
            strength: Region::new(200, 950, 300, 1000),
            server: Region::new(160, 860, 220, 915),
        }
    }
}

/// Resolution-independent UI layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LayoutTable", into = "LayoutTable")]
pub struct UiLayout {
    reference: Resolution,
    refresh: Anchor,
    share: Anchor,
    alliance_channel: Anchor,
    alliance_confirm: Anchor,
    world_channel: Anchor,
    world_confirm: Anchor,
    strength: Span,
    server: Span,
}

impl Default for UiLayout {
    fn default() -> Self {
        let table = LayoutTable::default();
        let reference = table.reference;
        Self {
            reference,
            refresh: Anchor::from_pixels(table.refresh, reference),
            share: Anchor::from_pixels(table.share, reference),
            alliance_channel: Anchor::from_pixels(table.alliance_channel, reference),
            alliance_confirm: Anchor::from_pixels(table.alliance_confirm, reference),
            world_channel: Anchor::from_pixels(table.world_channel, reference),
            world_confirm: Anchor::from_pixels(table.world_confirm, reference),
            strength: Span::from_pixels(table.strength, reference),
            server: Span::from_pixels(table.server, reference),
        }
    }
}

impl TryFrom<LayoutTable> for UiLayout {
    type Error = ConfigError;

    fn try_from(table: LayoutTable) -> Result<Self, Self::Error> {
        let reference = table.reference;
        if reference.width == 0 || reference.height == 0 {
            return Err(ConfigError::Invalid(
                "layout reference resolution must be non-zero".to_string(),
            ));
        }

        let points = [
            ("refresh", table.refresh),
            ("share", table.share),
            ("alliance_channel", table.alliance_channel),
            ("alliance_confirm", table.alliance_confirm),
            ("world_channel", table.world_channel),
            ("world_confirm", table.world_confirm),
        ];
        for (name, point) in points {
            if point.x >= reference.width || point.y >= reference.height {
                return Err(ConfigError::Invalid(format!(
                    "layout point {} {} lies outside {}",
                    name, point, reference
                )));
            }
        }
        for (name, region) in [("strength", table.strength), ("server", table.server)] {
            if !region.fits_within(reference.width, reference.height) {
                return Err(ConfigError::Invalid(format!(
                    "layout region {} {} does not fit {}",
                    name, region, reference
                )));
            }
        }

        Ok(Self {
            reference,
            refresh: Anchor::from_pixels(table.refresh, reference),
            share: Anchor::from_pixels(table.share, reference),
            alliance_channel: Anchor::from_pixels(table.alliance_channel, reference),
            alliance_confirm: Anchor::from_pixels(table.alliance_confirm, reference),
            world_channel: Anchor::from_pixels(table.world_channel, reference),
            world_confirm: Anchor::from_pixels(table.world_confirm, reference),
            strength: Span::from_pixels(table.strength, reference),
            server: Span::from_pixels(table.server, reference),
        })
    }
}

impl From<UiLayout> for LayoutTable {
    fn from(layout: UiLayout) -> Self {
        let resolved = layout.resolve(layout.reference);
        Self {
            reference: layout.reference,
            refresh: resolved.refresh,
            share: resolved.share,
            alliance_channel: resolved.alliance_channel,
            alliance_confirm: resolved.alliance_confirm,
            world_channel: resolved.world_channel,
            world_confirm: resolved.world_confirm,
            strength: resolved.strength,
            server: resolved.server,
        }
    }
}

impl UiLayout {
    /// Screen the table was tuned on
    pub fn reference(&self) -> Resolution {
        self.reference
    }

    /// Scale every position to `device` pixels
    pub fn resolve(&self, device: Resolution) -> ResolvedLayout {
        ResolvedLayout {
            resolution: device,
            refresh: self.refresh.to_pixels(device),
            share: self.share.to_pixels(device),
            alliance_channel: self.alliance_channel.to_pixels(device),
            alliance_confirm: self.alliance_confirm.to_pixels(device),
            world_channel: self.world_channel.to_pixels(device),
            world_confirm: self.world_confirm.to_pixels(device),
            strength: self.strength.to_pixels(device),
            server: self.server.to_pixels(device),
        }
    }
}

/// Layout in pixels of one concrete device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedLayout {
    pub resolution: Resolution,
    pub refresh: Point,
    pub share: Point,
    pub alliance_channel: Point,
    pub alliance_confirm: Point,
    pub world_channel: Point,
    pub world_confirm: Point,
    pub strength: Region,
    pub server: Region,
}

impl ResolvedLayout {
    /// Channel button and its confirmation button
    pub fn channel_targets(&self, channel: BroadcastChannel) -> (Point, Point) {
        match channel {
            BroadcastChannel::Alliance => (self.alliance_channel, self.alliance_confirm),
            BroadcastChannel::World => (self.world_channel, self.world_confirm),
        }
    }
}
