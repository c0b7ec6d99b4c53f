//! Throwaway display names for seeded creatures.

use rand::Rng;

const ONSETS: [&str; 12] = [
    "gr", "kh", "mor", "thr", "vel", "dra", "sk", "ur", "zan", "bel", "hag", "nyx",
];

const MIDDLES: [&str; 10] = ["ak", "ol", "ur", "eth", "ig", "om", "ar", "ul", "ez", "an"];

const ENDINGS: [&str; 8] = ["gash", "maw", "fang", "dim", "rot", "nash", "grim", "tusk"];

/// Produces a pronounceable two-or-three syllable creature name.
pub fn creature_name<R: Rng>(rng: &mut R) -> String {
    let onset = ONSETS[rng.gen_range(0..ONSETS.len())];
    let ending = ENDINGS[rng.gen_range(0..ENDINGS.len())];

    let mut name = String::from(onset);
    if rng.gen_bool(0.5) {
        name.push_str(MIDDLES[rng.gen_range(0..MIDDLES.len())]);
    }
    name.push_str(ending);

    // Capitalize the first letter.
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_names_are_nonempty_and_capitalized() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let name = creature_name(&mut rng);
            assert!(name.len() >= 4);
            assert!(name.chars().next().unwrap().is_uppercase());
        }
    }

    #[test]
    fn test_same_seed_same_names() {
        let mut a = rand::rngs::StdRng::seed_from_u64(99);
        let mut b = rand::rngs::StdRng::seed_from_u64(99);
        for _ in 0..10 {
            assert_eq!(creature_name(&mut a), creature_name(&mut b));
        }
    }
}
