//! Random nickname generator.
//!
//! XDCC bots and channel operators routinely ban obvious downloader nicks,
//! so the default nickname looks like an ordinary user: `AdjectiveNounNN`
//! (e.g. `QuietHeron7`), within IRC's typical 9-character limit.

use rand::RngExt;

const ADJECTIVES: &[&str] = &[
    "Quiet", "Amber", "Misty", "Rusty", "Pale", "Brisk", "Dusty", "Ember", "Faded", "Gray",
    "Hazel", "Ivory", "Jade", "Mellow", "Noble", "Ochre", "Plain", "Sable", "Tidal", "Umber",
    "Vivid", "Wry", "Young", "Zesty", "Calm", "Deep", "Easy", "Fleet",
];

const NOUNS: &[&str] = &[
    "Heron", "Finch", "Marten", "Skink", "Tern", "Vole", "Wren", "Adder", "Brant", "Crab",
    "Dove", "Eel", "Gull", "Hare", "Ibis", "Junco", "Kite", "Loon", "Mole", "Newt",
    "Orca", "Pike", "Quail", "Rook", "Shrew", "Teal",
];

/// Generate a random nickname like `QuietHeron7` (fits IRC nick limits).
pub fn generate_nickname() -> String {
    let mut rng = rand::rng();
    let adj = ADJECTIVES[rng.random_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.random_range(0..NOUNS.len())];
    let num: u8 = rng.random_range(0..100);
    format!("{}{}{}", adj, noun, num)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nicknames_are_nonempty_and_short() {
        for _ in 0..50 {
            let nick = generate_nickname();
            assert!(!nick.is_empty());
            assert!(nick.len() <= 14);
            assert!(nick.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }
}
