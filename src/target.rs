// SPDX-License-Identifier: MPL-2.0

//! Display targets and their placement on the shared compositing surface.

use std::fmt;

/// Stable identity of a discovered display, in discovery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub u32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Size and placement of one display. Immutable after discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGeometry {
    pub id: TargetId,
    /// Connector name reported by the compositor (e.g. `DP-1`).
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Offset of the display relative to the compositing surface origin.
    pub x_offset: u32,
    pub y_offset: u32,
    pub primary: bool,
}

/// A display as reported by the windowing system, in global coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredOutput {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub primary: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("no usable display outputs were found")]
    NoOutputs,
}

/// The ordered set of targets discovered once at startup.
#[derive(Debug, Clone, Default)]
pub struct Targets {
    targets: Vec<TargetGeometry>,
    /// Size of the bounding box covering every target.
    surface_size: (u32, u32),
}

impl Targets {
    /// Builds target geometry from the outputs reported by the windowing system.
    ///
    /// Outputs with an empty area are skipped. The compositing surface spans the
    /// bounding box of the remaining outputs and every offset is relative to its
    /// top-left corner. The first flagged output is the primary, or the first
    /// output when none is flagged.
    pub fn discover(
        outputs: impl IntoIterator<Item = DiscoveredOutput>,
    ) -> Result<Self, DiscoveryError> {
        let outputs: Vec<DiscoveredOutput> = outputs
            .into_iter()
            .filter(|output| {
                let usable = output.width > 0 && output.height > 0;
                if !usable {
                    tracing::warn!(
                        name = output.name,
                        width = output.width,
                        height = output.height,
                        "Skipping output with wrong dimensions"
                    );
                }
                usable
            })
            .collect();

        if outputs.is_empty() {
            return Err(DiscoveryError::NoOutputs);
        }

        let left = outputs.iter().map(|o| o.x).min().unwrap_or(0);
        let top = outputs.iter().map(|o| o.y).min().unwrap_or(0);
        let right = outputs.iter().map(|o| o.x + o.width).max().unwrap_or(0);
        let bottom = outputs.iter().map(|o| o.y + o.height).max().unwrap_or(0);

        let primary = outputs.iter().position(|o| o.primary).unwrap_or(0);

        let targets = outputs
            .into_iter()
            .enumerate()
            .map(|(index, output)| TargetGeometry {
                id: TargetId(index as u32),
                name: output.name,
                width: output.width as u32,
                height: output.height as u32,
                x_offset: (output.x - left) as u32,
                y_offset: (output.y - top) as u32,
                primary: index == primary,
            })
            .collect();

        Ok(Self {
            targets,
            surface_size: ((right - left) as u32, (bottom - top) as u32),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetGeometry> {
        self.targets.iter()
    }

    pub fn get(&self, id: TargetId) -> Option<&TargetGeometry> {
        self.targets.iter().find(|target| target.id == id)
    }

    #[cfg(test)]
    pub fn find(&self, name: &str) -> Option<&TargetGeometry> {
        self.targets.iter().find(|target| target.name == name)
    }

    pub fn primary(&self) -> Option<&TargetGeometry> {
        self.targets.iter().find(|target| target.primary)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Width and height of the compositing surface.
    pub fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(name: &str, x: i32, y: i32, width: i32, height: i32) -> DiscoveredOutput {
        DiscoveredOutput {
            name: name.to_owned(),
            x,
            y,
            width,
            height,
            primary: false,
        }
    }

    #[test]
    fn offsets_are_relative_to_surface_origin() {
        let targets = Targets::discover([
            output("DP-1", 0, 0, 1920, 1080),
            output("DP-2", -1280, 200, 1280, 1024),
        ])
        .unwrap();

        let dp1 = targets.find("DP-1").unwrap();
        assert_eq!((dp1.x_offset, dp1.y_offset), (1280, 0));

        let dp2 = targets.find("DP-2").unwrap();
        assert_eq!((dp2.x_offset, dp2.y_offset), (0, 200));

        assert_eq!(targets.surface_size(), (3200, 1224));
    }

    #[test]
    fn first_output_is_primary_unless_flagged() {
        let targets =
            Targets::discover([output("A", 0, 0, 800, 600), output("B", 800, 0, 800, 600)])
                .unwrap();
        assert_eq!(targets.primary().unwrap().name, "A");

        let mut b = output("B", 800, 0, 800, 600);
        b.primary = true;
        let targets = Targets::discover([output("A", 0, 0, 800, 600), b]).unwrap();
        assert_eq!(targets.primary().unwrap().name, "B");
        assert_eq!(targets.iter().filter(|t| t.primary).count(), 1);
    }

    #[test]
    fn empty_outputs_are_skipped() {
        let targets =
            Targets::discover([output("ghost", 0, 0, 0, 1080), output("real", 0, 0, 640, 480)])
                .unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets.get(TargetId(0)).unwrap().name, "real");
    }

    #[test]
    fn no_outputs_is_an_error() {
        assert_eq!(
            Targets::discover([output("ghost", 0, 0, 0, 0)]).unwrap_err(),
            DiscoveryError::NoOutputs
        );
    }
}
