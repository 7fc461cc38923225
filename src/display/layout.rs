//! Fixed tile placement on the shared canvas

use crate::SlotId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub slot: SlotId,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 2x2 quadrant layout
///
/// Slot 0 is top-left, 1 top-right, 2 bottom-left; every further slot shares
/// the bottom-right quadrant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MosaicLayout {
    pub width: u32,
    pub height: u32,
    tiles: Vec<Tile>,
}

impl MosaicLayout {
    pub fn new(slot_count: usize, width: u32, height: u32) -> Self {
        let tile_w = width / 2;
        let tile_h = height / 2;
        let tiles = (0..slot_count)
            .map(|i| {
                let (col, row) = match i {
                    0 => (0, 0),
                    1 => (1, 0),
                    2 => (0, 1),
                    _ => (1, 1),
                };
                Tile {
                    slot: SlotId(i),
                    x: col * tile_w,
                    y: row * tile_h,
                    width: tile_w,
                    height: tile_h,
                }
            })
            .collect();
        Self {
            width,
            height,
            tiles,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile(&self, slot: SlotId) -> Option<&Tile> {
        self.tiles.get(slot.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadrants_follow_channel_order() {
        let layout = MosaicLayout::new(4, 1920, 1080);
        let origins: Vec<(u32, u32)> = layout.tiles().iter().map(|t| (t.x, t.y)).collect();
        assert_eq!(origins, vec![(0, 0), (960, 0), (0, 540), (960, 540)]);
        assert!(layout.tiles().iter().all(|t| t.width == 960 && t.height == 540));
    }

    #[test]
    fn extra_slots_land_bottom_right() {
        let layout = MosaicLayout::new(6, 800, 600);
        for slot in 3..6 {
            let tile = layout.tile(SlotId(slot)).unwrap();
            assert_eq!((tile.x, tile.y), (400, 300));
        }
        assert!(layout.tile(SlotId(6)).is_none());
    }

    #[test]
    fn fewer_sources_keep_their_quadrant() {
        let layout = MosaicLayout::new(2, 1280, 720);
        assert_eq!(layout.slot_count(), 2);
        assert_eq!(layout.tile(SlotId(1)).map(|t| (t.x, t.y)), Some((640, 0)));
    }
}
