//! Deduplicated table of per-vertex bone weight sets.

use crate::SkinMode;

/// Weights at or below this are treated as noise and never take a slot.
pub const BLEND_WEIGHT_EPSILON: f32 = 1e-3;

/// Up to four (bone, weight) pairs, sorted by descending weight with zero weights trailing.
#[derive(Clone, Debug)]
pub struct BlendCombo {
    pub bones: [usize; 4],
    pub weights: [f32; 4],
    pub uses: u32,
    /// Extra bone slot holding the pre-blended transform, when this combo is blended on the CPU.
    pub interp_index: Option<usize>,
    pub interp_bones: [usize; 4],
}

impl Default for BlendCombo {
    fn default() -> Self {
        Self {
            bones: [0; 4],
            weights: [0.0; 4],
            uses: 1,
            interp_index: None,
            interp_bones: [0; 4],
        }
    }
}

impl PartialEq for BlendCombo {
    fn eq(&self, other: &Self) -> bool {
        self.bones == other.bones && self.weights == other.weights
    }
}

impl BlendCombo {
    /// Collects raw (bone, weight) pairs, keeping the four largest, and normalizes them.
    pub fn from_weights(pairs: impl IntoIterator<Item = (usize, f32)>) -> Self {
        let mut combo = BlendCombo::default();
        let mut sorted = 0;
        for (bone, weight) in pairs {
            sorted = combo.add_weight(sorted, weight, bone);
        }
        combo.finalize(sorted);
        combo
    }

    /// Number of weight slots in use; never less than one.
    pub fn size(&self) -> usize {
        let mut i = 1;
        while i < 4 && self.weights[i] != 0.0 {
            i += 1;
        }
        i
    }

    /// Inserts `weight` in descending order among the first `sorted` slots and returns the new
    /// count. The smallest weight falls off once all four slots are taken.
    pub fn add_weight(&mut self, sorted: usize, weight: f32, bone: usize) -> usize {
        if weight <= BLEND_WEIGHT_EPSILON {
            return sorted;
        }
        for k in 0..sorted {
            if weight > self.weights[k] {
                let mut l = sorted.min(3);
                while l > k {
                    self.weights[l] = self.weights[l - 1];
                    self.bones[l] = self.bones[l - 1];
                    l -= 1;
                }
                self.weights[k] = weight;
                self.bones[k] = bone;
                return if sorted < 4 { sorted + 1 } else { sorted };
            }
        }
        if sorted >= 4 {
            return sorted;
        }
        self.weights[sorted] = weight;
        self.bones[sorted] = bone;
        sorted + 1
    }

    /// Zeroes unused slots and rescales the used ones to sum to one.
    pub fn finalize(&mut self, sorted: usize) {
        for j in sorted..4 {
            self.weights[j] = 0.0;
            self.bones[j] = 0;
        }
        if sorted == 0 {
            return;
        }
        let total: f32 = self.weights[..sorted].iter().sum();
        let inv = 1.0 / total;
        for w in &mut self.weights[..sorted] {
            *w *= inv;
        }
    }

    /// Byte weights and shader bone offsets for a GPU-skinned vertex. The byte weights always
    /// sum to exactly 255.
    pub fn serialize(&self, mode: SkinMode) -> ([u8; 4], [u8; 4]) {
        let stride = mode.float4s_per_bone();
        let slot = |index: usize| u8::try_from(stride * index).unwrap_or(u8::MAX);
        if let Some(index) = self.interp_index {
            let bone = slot(index);
            return ([255, 0, 0, 0], [bone; 4]);
        }

        let mut weights = [0u8; 4];
        let mut total: i32 = 0;
        for k in 0..4 {
            weights[k] = (self.weights[k] * 255.0 + 0.5) as u8;
            total += i32::from(weights[k]);
        }
        while total > 255 {
            for w in &mut weights {
                if *w > 0 && total > 255 {
                    *w -= 1;
                    total -= 1;
                }
            }
        }
        while total < 255 {
            for w in &mut weights {
                if *w < 255 && total < 255 {
                    *w += 1;
                    total += 1;
                }
            }
        }
        let bones = self.interp_bones.map(slot);
        (weights, bones)
    }
}

#[derive(Clone, Debug, Default)]
pub struct BlendTable {
    pub combos: Vec<BlendCombo>,
    /// Count of combos by size: `num_blends[n - 1]` combos use `n` weights.
    pub num_blends: [usize; 4],
}

impl BlendTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    /// Returns the index of an equal combo (bumping its use count) or appends a new one.
    pub fn add_blend_combo(&mut self, combo: BlendCombo) -> usize {
        if let Some(i) = self.combos.iter().position(|c| *c == combo) {
            self.combos[i].uses += combo.uses;
            return i;
        }
        self.num_blends[combo.size() - 1] += 1;
        self.combos.push(combo);
        self.combos.len() - 1
    }

    /// Groups combos by weight count, fewest weights first, keeping insertion order within a
    /// group. Returns `remap[old_index] = new_index` for fixing up vertex blend indices.
    pub fn sort_blend_combos(&mut self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.combos.len()).collect();
        order.sort_by_key(|&i| self.combos[i].size());
        let mut remap = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new;
        }
        let mut old = std::mem::take(&mut self.combos)
            .into_iter()
            .map(Some)
            .collect::<Vec<_>>();
        self.combos = order.iter().filter_map(|&i| old[i].take()).collect();
        remap
    }

    /// Slot a CPU-skinned vertex reads: the pre-blended slot for multi-bone combos, otherwise
    /// the single bone's interp index.
    pub fn remap_blend(&self, blend: usize) -> usize {
        let c = &self.combos[blend];
        match c.interp_index {
            Some(index) if c.weights[1] != 0.0 => index,
            _ => c.interp_bones[0],
        }
    }

    /// Combos that need a pre-blended slot, in table order.
    pub fn blended(&self) -> impl Iterator<Item = (usize, &BlendCombo)> {
        self.combos
            .iter()
            .filter_map(|c| c.interp_index.map(|index| (index, c)))
    }
}
