use rand::seq::IndexedRandom;

const ADJECTIVES: &[&str] = &[
    "able", "brave", "calm", "clever", "eager", "fancy", "gentle", "happy", "jolly", "kind",
    "lively", "mighty", "nimble", "proud", "quick", "quiet", "silly", "swift", "tidy", "witty",
];

const COLORS: &[&str] = &[
    "amber", "aqua", "azure", "black", "blue", "bronze", "coral", "crimson", "gold", "green",
    "indigo", "ivory", "lime", "magenta", "olive", "orange", "purple", "red", "silver", "teal",
];

const ANIMALS: &[&str] = &[
    "badger", "bat", "bear", "beaver", "camel", "cobra", "crane", "eagle", "falcon", "fox",
    "gecko", "heron", "koala", "lynx", "moose", "otter", "panda", "raven", "tiger", "walrus",
];

/// Generate `<prefix>-<adjective>-<color>-<animal>`.
pub fn unique_name(prefix: &str) -> String {
    let mut rng = rand::rng();
    format!(
        "{}-{}-{}-{}",
        prefix,
        ADJECTIVES.choose(&mut rng).unwrap_or(&"plain"),
        COLORS.choose(&mut rng).unwrap_or(&"grey"),
        ANIMALS.choose(&mut rng).unwrap_or(&"cat"),
    )
}
