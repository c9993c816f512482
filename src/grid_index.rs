//! A uniform grid over a square extent for axis-aligned box queries.

/// A box as `[x1, y1, x2, y2]`, edges inclusive.
pub type BBox = [i32; 4];

const METADATA_LENGTH: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct GridIndex {
    extent: i32,
    n: i32,
    padding: i32,
    scale: f64,
    min: i32,
    max: i32,
    cells: Vec<Vec<u32>>,
    keys: Vec<u32>,
    bboxes: Vec<BBox>,
}

impl GridIndex {
    /// A grid of `n × n` cells over `0..extent`, plus `padding` cells on every
    /// side for boxes hanging over the edges.
    pub fn new(extent: i32, n: i32, padding: i32) -> Self {
        let d = (n + 2 * padding).max(1) as usize;
        let scale = n as f64 / extent.max(1) as f64;

        GridIndex {
            extent,
            n,
            padding,
            scale,
            min: (-padding as f64 / scale) as i32,
            max: (extent as f64 + padding as f64 / scale) as i32,
            cells: vec![Vec::new(); d * d],
            keys: Vec::new(),
            bboxes: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn insert(&mut self, key: u32, bbox: BBox) {
        let uid = self.keys.len() as u32;
        self.keys.push(key);
        self.bboxes.push(bbox);

        let [x1, y1, x2, y2] = self.cell_range(bbox);
        for y in y1..=y2 {
            for x in x1..=x2 {
                let cell = self.cell_index(x, y);
                self.cells[cell].push(uid);
            }
        }
    }

    /// Keys of every box intersecting `bbox`, each reported once in insertion
    /// order per cell walk.
    pub fn query(&self, bbox: BBox) -> Vec<u32> {
        let [x1, y1, x2, y2] = bbox;
        if x1 <= self.min && y1 <= self.min && self.max <= x2 && self.max <= y2 {
            return self.keys.clone();
        }

        let mut result = Vec::new();
        let mut seen = vec![false; self.keys.len()];
        let [cx1, cy1, cx2, cy2] = self.cell_range(bbox);

        for y in cy1..=cy2 {
            for x in cx1..=cx2 {
                for &uid in &self.cells[self.cell_index(x, y)] {
                    let uid = uid as usize;
                    if seen[uid] {
                        continue;
                    }
                    seen[uid] = true;

                    if intersects(&self.bboxes[uid], &bbox) {
                        result.push(self.keys[uid]);
                    }
                }
            }
        }

        result
    }

    fn cell_range(&self, [x1, y1, x2, y2]: BBox) -> [i32; 4] {
        [
            self.to_cell_coord(x1),
            self.to_cell_coord(y1),
            self.to_cell_coord(x2),
            self.to_cell_coord(y2),
        ]
    }

    fn to_cell_coord(&self, v: i32) -> i32 {
        let d = self.n + 2 * self.padding;
        ((v as f64 * self.scale).floor() as i32 + self.padding).clamp(0, (d - 1).max(0))
    }

    fn cell_index(&self, x: i32, y: i32) -> usize {
        let d = self.n + 2 * self.padding;
        (y * d + x) as usize
    }

    /// Flattens the grid into `[extent, n, padding, cell offsets.., keys
    /// offset, bboxes offset, cell contents.., keys.., bboxes..]`. Cell `i`
    /// spans from its offset to the next one.
    pub fn serialize(&self) -> Vec<i32> {
        let cells_start = METADATA_LENGTH + self.cells.len() + 2;
        let cells_length: usize = self.cells.iter().map(Vec::len).sum();
        let keys_offset = cells_start + cells_length;
        let bboxes_offset = keys_offset + self.keys.len();

        let mut array = Vec::with_capacity(bboxes_offset + self.bboxes.len() * 4);
        array.extend([self.extent, self.n, self.padding]);

        let mut offset = cells_start;
        for cell in &self.cells {
            array.push(offset as i32);
            offset += cell.len();
        }
        array.push(keys_offset as i32);
        array.push(bboxes_offset as i32);

        for cell in &self.cells {
            array.extend(cell.iter().map(|&uid| uid as i32));
        }
        array.extend(self.keys.iter().map(|&key| key as i32));
        array.extend(self.bboxes.iter().flatten());

        array
    }

    /// Rebuilds a grid from [`GridIndex::serialize`] output. Returns `None`
    /// when the offsets are inconsistent.
    pub fn from_serialized(array: &[i32]) -> Option<Self> {
        let [extent, n, padding] = *array.get(..METADATA_LENGTH)? else {
            return None;
        };
        if extent <= 0 || n <= 0 || padding < 0 {
            return None;
        }
        // Every cell needs an offset, so the header cannot claim more cells
        // than the array holds
        let d = usize::try_from(n.checked_add(padding.checked_mul(2)?)?).ok()?;
        if d.checked_mul(d)?.checked_add(METADATA_LENGTH + 2)? > array.len() {
            return None;
        }
        let mut grid = GridIndex::new(extent, n, padding);
        let cell_count = grid.cells.len();

        let offsets = array.get(METADATA_LENGTH..METADATA_LENGTH + cell_count + 2)?;
        let keys_offset = offsets[cell_count] as usize;
        let bboxes_offset = offsets[cell_count + 1] as usize;

        for (i, cell) in grid.cells.iter_mut().enumerate() {
            let start = offsets[i] as usize;
            let end = offsets[i + 1] as usize;
            *cell = array.get(start..end)?.iter().map(|&uid| uid as u32).collect();
        }

        grid.keys = array
            .get(keys_offset..bboxes_offset)?
            .iter()
            .map(|&key| key as u32)
            .collect();

        let bboxes = array.get(bboxes_offset..)?;
        if bboxes.len() != grid.keys.len() * 4 {
            return None;
        }
        grid.bboxes = bboxes
            .chunks_exact(4)
            .map(|b| [b[0], b[1], b[2], b[3]])
            .collect();

        let uid_count = grid.keys.len() as u32;
        if grid.cells.iter().flatten().any(|&uid| uid >= uid_count) {
            return None;
        }

        Some(grid)
    }
}

fn intersects(a: &BBox, b: &BBox) -> bool {
    a[0] <= b[2] && a[1] <= b[3] && a[2] >= b[0] && a[3] >= b[1]
}
