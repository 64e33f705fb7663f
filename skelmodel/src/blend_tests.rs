use crate::test_fixtures::assert_approx;
use crate::{BlendCombo, BlendTable, SkinMode};

#[test]
fn keeps_the_four_heaviest_weights_in_descending_order() {
    let c = BlendCombo::from_weights([(0, 0.1), (1, 0.4), (2, 0.2), (3, 0.05), (4, 0.25)]);
    assert_eq!(c.bones, [1, 4, 2, 0]);
    assert_eq!(c.size(), 4);
    let total = 0.95;
    assert_approx(c.weights[0], 0.4 / total);
    assert_approx(c.weights[1], 0.25 / total);
    assert_approx(c.weights[2], 0.2 / total);
    assert_approx(c.weights[3], 0.1 / total);
}

#[test]
fn negligible_weights_never_take_a_slot() {
    let c = BlendCombo::from_weights([(0, 0.0005), (7, 2.0)]);
    assert_eq!(c.size(), 1);
    assert_eq!(c.bones[0], 7);
    assert_approx(c.weights[0], 1.0);
    assert_eq!(c.weights[1], 0.0);
}

#[test]
fn serialized_weights_sum_to_255() {
    for pairs in [
        vec![(0, 0.5), (1, 0.3), (2, 0.2)],
        vec![(0, 1.0), (1, 1.0), (2, 1.0)],
        vec![(0, 0.7), (1, 0.1), (2, 0.1), (3, 0.1)],
        vec![(3, 1.0)],
    ] {
        let mut c = BlendCombo::from_weights(pairs);
        c.interp_bones = c.bones;
        let (weights, _) = c.serialize(SkinMode::DualQuat);
        let sum: u32 = weights.iter().map(|&w| u32::from(w)).sum();
        assert_eq!(sum, 255, "{weights:?}");
    }
}

#[test]
fn serialized_weights_round_to_the_nearest_byte() {
    let mut c = BlendCombo::from_weights([(0, 0.5), (1, 0.25), (2, 0.25)]);
    c.interp_bones = c.bones;
    let (weights, _) = c.serialize(SkinMode::DualQuat);
    assert_eq!(weights, [127, 64, 64, 0]);
}

#[test]
fn serialized_bones_are_register_offsets() {
    let mut c = BlendCombo::from_weights([(0, 0.6), (1, 0.4)]);
    c.interp_bones = [3, 5, 5, 5];
    let (_, bones) = c.serialize(SkinMode::DualQuat);
    assert_eq!(bones, [6, 10, 10, 10]);
    let (_, bones) = c.serialize(SkinMode::Matrix);
    assert_eq!(bones, [9, 15, 15, 15]);
}

#[test]
fn preblended_combos_serialize_as_one_full_weight() {
    let mut c = BlendCombo::from_weights([(0, 0.6), (1, 0.4)]);
    c.interp_index = Some(7);
    let (weights, bones) = c.serialize(SkinMode::DualQuat);
    assert_eq!(weights, [255, 0, 0, 0]);
    assert_eq!(bones, [14; 4]);
}

#[test]
fn equal_combos_are_shared_and_counted() {
    let mut table = BlendTable::new();
    let a = table.add_blend_combo(BlendCombo::from_weights([(0, 1.0)]));
    let b = table.add_blend_combo(BlendCombo::from_weights([(1, 0.5), (2, 0.5)]));
    let again = table.add_blend_combo(BlendCombo::from_weights([(0, 1.0)]));
    assert_eq!(a, again);
    assert_ne!(a, b);
    assert_eq!(table.len(), 2);
    assert_eq!(table.combos[a].uses, 2);
    assert_eq!(table.num_blends, [1, 1, 0, 0]);
}

#[test]
fn sorting_groups_by_weight_count_and_reports_the_remap() {
    let mut table = BlendTable::new();
    let two = table.add_blend_combo(BlendCombo::from_weights([(1, 0.5), (2, 0.5)]));
    let one_a = table.add_blend_combo(BlendCombo::from_weights([(0, 1.0)]));
    let three = table.add_blend_combo(BlendCombo::from_weights([(0, 0.5), (1, 0.3), (2, 0.2)]));
    let one_b = table.add_blend_combo(BlendCombo::from_weights([(3, 1.0)]));

    let remap = table.sort_blend_combos();
    let sizes: Vec<usize> = table.combos.iter().map(BlendCombo::size).collect();
    assert_eq!(sizes, [1, 1, 2, 3]);
    assert_eq!(remap[one_a], 0);
    assert_eq!(remap[one_b], 1);
    assert_eq!(remap[two], 2);
    assert_eq!(remap[three], 3);
    assert_eq!(table.combos[remap[one_b]].bones[0], 3);
}

#[test]
fn cpu_remap_prefers_the_preblended_slot() {
    let mut table = BlendTable::new();
    let single = table.add_blend_combo(BlendCombo::from_weights([(4, 1.0)]));
    let pair = table.add_blend_combo(BlendCombo::from_weights([(1, 0.5), (2, 0.5)]));
    table.combos[single].interp_bones = [6, 6, 6, 6];
    table.combos[pair].interp_bones = [1, 2, 2, 2];
    table.combos[pair].interp_index = Some(9);

    assert_eq!(table.remap_blend(single), 6);
    assert_eq!(table.remap_blend(pair), 9);
    let blended: Vec<usize> = table.blended().map(|(i, _)| i).collect();
    assert_eq!(blended, [9]);
}
