//! Puzzle model and verifier.
//!
//! A [`Puzzle`] is one challenge: a target [`Label`], an ordered grid of image ids, and the
//! set of grid indices that show the label. The correct set is never transmitted; both
//! parties derive it from the grid and the label through an [`ImageCatalog`].
//!
//! # Matching rule
//!
//! Labels and image tags are reduced to a *key*: lower-case words joined by `_`, each word
//! singularized (`"Traffic Lights"` becomes `traffic_light`). An image matches a label if
//! one of its tags has the label's key. Images the catalog has never heard of fall back to
//! a substring test of the key against the image id, so `"img/traffic_light_3.png"`
//! matches `"Traffic Lights"`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::RangeInclusive;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{DuelError, DuelResult, InvalidRequestKind, Verdict};

const REGENERATE_ATTEMPTS: usize = 8;

/// Reduces a label or tag to its matching key.
///
/// ```
/// use captcha_duel::puzzle::label_key;
///
/// assert_eq!(label_key("Traffic Lights"), "traffic_light");
/// assert_eq!(label_key("CARS"), "car");
/// assert_eq!(label_key("buses"), "bus");
/// assert_eq!(label_key("  fire-hydrant "), "fire_hydrant");
/// ```
#[must_use]
pub fn label_key(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| singularize(&word.to_lowercase()))
        .collect::<Vec<_>>()
        .join("_")
}

fn singularize(word: &str) -> String {
    if word.chars().count() <= 3 || word.ends_with("ss") {
        return word.to_owned();
    }
    let sibilant = ["ches", "shes", "xes", "ses"]
        .iter()
        .any(|suffix| word.ends_with(suffix));
    let stem = if sibilant {
        word.strip_suffix("es")
    } else {
        word.strip_suffix('s')
    };
    stem.unwrap_or(word).to_owned()
}

/// A challenge label as shown to the player, with its derived matching key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    text: String,
    key: String,
}

impl Label {
    /// Creates a label, deriving the key from `text`.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let key = label_key(&text);
        Self { text, key }
    }

    /// The text shown to the player.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The matching key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// An image reference with its content tags (already reduced to keys).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Id or URL of the image, as sent on the wire.
    pub id: String,
    /// Content keys of the image.
    pub tags: BTreeSet<String>,
}

impl ImageRef {
    /// Creates an image reference. Tags are reduced with [`label_key`].
    #[must_use]
    pub fn new<I, T>(id: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        Self {
            id: id.into(),
            tags: tags.into_iter().map(|t| label_key(t.as_ref())).collect(),
        }
    }

    /// Returns `true` if the image carries the label's key.
    #[must_use]
    pub fn shows(&self, label: &Label) -> bool {
        self.tags.contains(label.key())
    }
}

/// The images and labels puzzles are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCatalog {
    images: Vec<ImageRef>,
    labels: Vec<Label>,
    by_id: HashMap<String, usize>,
}

impl ImageCatalog {
    /// Creates a catalog.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidRequestKind::EmptyCatalog`] if either list is empty.
    pub fn new(images: Vec<ImageRef>, labels: Vec<Label>) -> DuelResult<Self> {
        if images.is_empty() || labels.is_empty() {
            return Err(InvalidRequestKind::EmptyCatalog.into());
        }
        Ok(Self::with_parts(images, labels))
    }

    /// A small street-scene catalog, enough to play without external assets.
    #[must_use]
    pub fn builtin() -> Self {
        const SUBJECTS: [(&str, usize, &[&str]); 11] = [
            ("car", 5, &["car"]),
            ("traffic_light", 4, &["traffic light"]),
            ("crosswalk", 4, &["crosswalk"]),
            ("bicycle", 4, &["bicycle"]),
            ("bus", 4, &["bus"]),
            ("fire_hydrant", 3, &["fire hydrant"]),
            ("intersection", 3, &["car", "traffic light", "crosswalk"]),
            ("bike_lane", 2, &["bicycle", "car"]),
            ("tree", 3, &["tree"]),
            ("mountain", 3, &["mountain"]),
            ("storefront", 3, &["storefront"]),
        ];
        let images = SUBJECTS
            .iter()
            .flat_map(|(stem, count, tags)| {
                (1..=*count).map(move |n| ImageRef::new(format!("images/{stem}_{n:02}.jpg"), *tags))
            })
            .collect();
        let labels = ["Cars", "Traffic Lights", "Crosswalks", "Bicycles", "Buses", "Fire Hydrants"]
            .into_iter()
            .map(Label::new)
            .collect();
        Self::with_parts(images, labels)
    }

    fn with_parts(images: Vec<ImageRef>, labels: Vec<Label>) -> Self {
        let by_id = images
            .iter()
            .enumerate()
            .map(|(i, image)| (image.id.clone(), i))
            .collect();
        Self {
            images,
            labels,
            by_id,
        }
    }

    /// All images.
    #[must_use]
    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    /// All labels puzzles may ask for.
    #[must_use]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Picks a random label, preferring labels shown by at least one image.
    ///
    /// Falls back to any label only when no label is shown at all.
    #[must_use]
    pub fn choose_label<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Label> {
        let shown: Vec<&Label> = self
            .labels
            .iter()
            .filter(|label| self.images.iter().any(|image| image.shows(label)))
            .collect();
        if shown.is_empty() {
            self.labels.choose(rng)
        } else {
            shown.choose(rng).copied()
        }
    }

    /// Looks an image up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ImageRef> {
        self.by_id.get(id).and_then(|&i| self.images.get(i))
    }

    /// Applies the matching rule to one image id.
    #[must_use]
    pub fn matches(&self, label: &Label, id: &str) -> bool {
        match self.get(id) {
            Some(image) => image.shows(label),
            None => !label.key().is_empty() && id.to_lowercase().contains(label.key()),
        }
    }

    /// Grid indices whose image matches `label`.
    #[must_use]
    pub fn correct_indices(&self, label: &Label, ids: &[String]) -> BTreeSet<usize> {
        ids.iter()
            .enumerate()
            .filter(|(_, id)| self.matches(label, id))
            .map(|(i, _)| i)
            .collect()
    }
}

impl Default for ImageCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// One side's active challenge.
///
/// ```
/// use captcha_duel::{ImageCatalog, Puzzle, Verdict};
///
/// let catalog = ImageCatalog::builtin();
/// let images = vec![
///     "images/car_01.jpg".to_owned(),
///     "images/tree_01.jpg".to_owned(),
///     "images/car_02.jpg".to_owned(),
/// ];
/// let mut puzzle = Puzzle::from_wire("Cars", images, &catalog);
/// assert_eq!(puzzle.correct_indices().iter().copied().collect::<Vec<_>>(), vec![0, 2]);
///
/// puzzle.toggle(2)?;
/// puzzle.toggle(0)?;
/// assert_eq!(puzzle.verify(), Verdict::Correct);
/// # Ok::<(), captcha_duel::DuelError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Puzzle {
    target: Label,
    images: Vec<String>,
    correct: BTreeSet<usize>,
    selection: BTreeSet<usize>,
}

impl Puzzle {
    /// Builds a puzzle from a label and a grid, deriving the correct set from `catalog`.
    #[must_use]
    pub fn new(target: Label, images: Vec<String>, catalog: &ImageCatalog) -> Self {
        let correct = catalog.correct_indices(&target, &images);
        Self {
            target,
            images,
            correct,
            selection: BTreeSet::new(),
        }
    }

    /// Builds a puzzle from the raw `target` text and `images` of a protocol message.
    #[must_use]
    pub fn from_wire(target: &str, images: Vec<String>, catalog: &ImageCatalog) -> Self {
        Self::new(Label::new(target), images, catalog)
    }

    /// The label to look for.
    #[must_use]
    pub fn target(&self) -> &Label {
        &self.target
    }

    /// The grid, in display order.
    #[must_use]
    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Number of images in the grid.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns `true` for an empty grid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Indices that must be selected.
    #[must_use]
    pub fn correct_indices(&self) -> &BTreeSet<usize> {
        &self.correct
    }

    /// Indices currently selected.
    #[must_use]
    pub fn selection(&self) -> &BTreeSet<usize> {
        &self.selection
    }

    /// Correct indices that are not selected yet, ascending.
    #[must_use]
    pub fn remaining(&self) -> Vec<usize> {
        self.correct.difference(&self.selection).copied().collect()
    }

    /// Returns `false` if the grid contains no correct image.
    #[must_use]
    pub fn is_solvable(&self) -> bool {
        !self.correct.is_empty()
    }

    /// Toggles `index` in the selection.
    ///
    /// # Errors
    ///
    /// Returns [`DuelError::IndexOutOfRange`] without touching the selection if `index` is
    /// outside the grid.
    pub fn toggle(&mut self, index: usize) -> DuelResult<()> {
        if index >= self.images.len() {
            return Err(DuelError::IndexOutOfRange {
                index,
                len: self.images.len(),
            });
        }
        if !self.selection.remove(&index) {
            self.selection.insert(index);
        }
        Ok(())
    }

    /// Grades the selection: correct only on an exact set match.
    ///
    /// A puzzle without correct images can never be solved.
    #[must_use]
    pub fn verify(&self) -> Verdict {
        if self.is_solvable() && self.selection == self.correct {
            Verdict::Correct
        } else {
            Verdict::Wrong
        }
    }

    /// Empties the selection.
    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }
}

/// Generates a fresh puzzle.
///
/// Picks a random label shown by at least one image, draws a count from `correct`
/// (clamped to what the catalog can provide) of images showing it, pads the grid with
/// other images up to `grid_size`, and shuffles. When images without the label exist, the
/// grid is never all-correct. Only a catalog where no label is shown by any image yields
/// a puzzle with zero correct indices, which cannot be solved.
///
/// If the catalog has fewer non-matching images than needed, fillers repeat. If it has no
/// non-matching images at all, the grid holds every tagged image up to `grid_size`.
pub fn generate_puzzle<R: Rng + ?Sized>(
    catalog: &ImageCatalog,
    grid_size: usize,
    correct: RangeInclusive<usize>,
    rng: &mut R,
) -> Puzzle {
    let Some(label) = catalog.choose_label(rng).cloned() else {
        return Puzzle::new(Label::new(""), Vec::new(), catalog);
    };
    generate_puzzle_for(catalog, label, grid_size, correct, rng)
}

/// Generates a fresh puzzle for a fixed `label`, with the grid rules of
/// [`generate_puzzle`].
pub fn generate_puzzle_for<R: Rng + ?Sized>(
    catalog: &ImageCatalog,
    label: Label,
    grid_size: usize,
    correct: RangeInclusive<usize>,
    rng: &mut R,
) -> Puzzle {
    let (tagged, fillers): (Vec<&ImageRef>, Vec<&ImageRef>) =
        catalog.images().iter().partition(|image| image.shows(&label));

    let n_correct = if fillers.is_empty() {
        tagged.len().min(grid_size)
    } else {
        let upper = (*correct.end())
            .min(tagged.len())
            .min(grid_size.saturating_sub(1));
        let lower = (*correct.start()).clamp(1, upper.max(1));
        if upper == 0 {
            0
        } else {
            rng.gen_range(lower..=upper)
        }
    };

    let mut grid: Vec<String> = tagged
        .choose_multiple(rng, n_correct)
        .map(|image| image.id.clone())
        .collect();

    let n_fillers = grid_size - n_correct;
    if !fillers.is_empty() {
        grid.extend(
            fillers
                .choose_multiple(rng, n_fillers.min(fillers.len()))
                .map(|image| image.id.clone()),
        );
        while grid.len() < grid_size {
            if let Some(image) = fillers.choose(rng) {
                grid.push(image.id.clone());
            }
        }
    }
    grid.shuffle(rng);

    Puzzle::new(label, grid, catalog)
}

/// Like [`generate_puzzle`], but retries a few times so the result differs from
/// `previous` in label or grid.
pub fn regenerate_puzzle<R: Rng + ?Sized>(
    catalog: &ImageCatalog,
    grid_size: usize,
    correct: RangeInclusive<usize>,
    previous: &Puzzle,
    rng: &mut R,
) -> Puzzle {
    let mut next = generate_puzzle(catalog, grid_size, correct.clone(), rng);
    for _ in 1..REGENERATE_ATTEMPTS {
        if next.target != previous.target || next.images != previous.images {
            break;
        }
        next = generate_puzzle(catalog, grid_size, correct.clone(), rng);
    }
    next
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn singularizes_common_plurals() {
        assert_eq!(label_key("Crosswalks"), "crosswalk");
        assert_eq!(label_key("Bicycles"), "bicycle");
        assert_eq!(label_key("glasses"), "glass");
        assert_eq!(label_key("Bus"), "bus");
        assert_eq!(label_key(""), "");
    }

    #[test]
    fn unknown_images_match_by_id() {
        let catalog = ImageCatalog::builtin();
        let label = Label::new("Traffic Lights");
        assert!(catalog.matches(&label, "https://cdn/Traffic_Light_3.png"));
        assert!(!catalog.matches(&label, "https://via.placeholder.com/150?text=Img+0"));
    }

    #[test]
    fn catalog_tags_take_precedence_over_id() {
        let catalog = ImageCatalog::builtin();
        // The intersection shots show cars even though the id does not say so.
        assert!(catalog.matches(&Label::new("Cars"), "images/intersection_01.jpg"));
        assert!(!catalog.matches(&Label::new("Buses"), "images/intersection_01.jpg"));
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let err = ImageCatalog::new(Vec::new(), vec![Label::new("Cars")]).unwrap_err();
        assert_eq!(err, InvalidRequestKind::EmptyCatalog.into());
    }

    #[test]
    fn toggle_out_of_range_does_not_mutate() {
        let catalog = ImageCatalog::builtin();
        let mut puzzle = Puzzle::from_wire("Cars", ids(&["images/car_01.jpg"]), &catalog);
        puzzle.toggle(0).unwrap();
        let err = puzzle.toggle(1).unwrap_err();
        assert_eq!(err, DuelError::IndexOutOfRange { index: 1, len: 1 });
        assert_eq!(puzzle.selection().len(), 1);
    }

    #[test]
    fn partial_selection_is_wrong() {
        let catalog = ImageCatalog::builtin();
        let mut puzzle = Puzzle::from_wire(
            "Cars",
            ids(&["images/car_01.jpg", "images/car_02.jpg", "images/tree_01.jpg"]),
            &catalog,
        );
        puzzle.toggle(0).unwrap();
        assert_eq!(puzzle.verify(), Verdict::Wrong);
        assert_eq!(puzzle.remaining(), vec![1]);
        puzzle.toggle(1).unwrap();
        puzzle.toggle(2).unwrap();
        assert_eq!(puzzle.verify(), Verdict::Wrong);
    }

    #[test]
    fn zero_correct_puzzle_is_unsolvable() {
        let catalog = ImageCatalog::builtin();
        let puzzle = Puzzle::from_wire("Unicorns", ids(&["images/tree_01.jpg"]), &catalog);
        assert!(!puzzle.is_solvable());
        assert_eq!(puzzle.verify(), Verdict::Wrong);
    }

    #[test]
    fn generated_puzzles_respect_bounds() {
        let catalog = ImageCatalog::builtin();
        let mut rng = SmallRng::seed_from_u64(11);
        for _ in 0..200 {
            let puzzle = generate_puzzle(&catalog, 9, 1..=3, &mut rng);
            assert_eq!(puzzle.len(), 9);
            let n = puzzle.correct_indices().len();
            assert!((1..=3).contains(&n), "{n} correct images for {}", puzzle.target());
            assert!(puzzle.selection().is_empty());
        }
    }

    #[test]
    fn generation_skips_labels_no_image_shows() {
        let images = vec![
            ImageRef::new("car.jpg", ["car"]),
            ImageRef::new("tree.jpg", ["tree"]),
            ImageRef::new("hill.jpg", ["mountain"]),
        ];
        let labels = vec![Label::new("Cars"), Label::new("Buses"), Label::new("Boats")];
        let catalog = ImageCatalog::new(images, labels).unwrap();
        for seed in 0..64 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let puzzle = generate_puzzle(&catalog, 9, 1..=3, &mut rng);
            assert_eq!(puzzle.target().text(), "Cars");
            assert!(puzzle.is_solvable());
        }
    }

    #[test]
    fn generation_degrades_without_tagged_images() {
        let images = vec![
            ImageRef::new("a.jpg", ["tree"]),
            ImageRef::new("b.jpg", ["mountain"]),
        ];
        let catalog = ImageCatalog::new(images, vec![Label::new("Cars")]).unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        let puzzle = generate_puzzle(&catalog, 9, 1..=3, &mut rng);
        assert_eq!(puzzle.len(), 9);
        assert!(puzzle.correct_indices().is_empty());
    }

    #[test]
    fn generation_without_fillers_uses_every_tagged_image() {
        let images = vec![ImageRef::new("a.jpg", ["car"]), ImageRef::new("b.jpg", ["car"])];
        let catalog = ImageCatalog::new(images, vec![Label::new("Cars")]).unwrap();
        for seed in 0..16 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let puzzle = generate_puzzle(&catalog, 9, 1..=3, &mut rng);
            assert_eq!(puzzle.len(), 2);
            assert_eq!(puzzle.correct_indices().len(), 2);
        }
        let mut rng = SmallRng::seed_from_u64(3);
        let capped = generate_puzzle(&catalog, 1, 1..=3, &mut rng);
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn regenerate_differs_from_previous() {
        let catalog = ImageCatalog::builtin();
        let mut rng = SmallRng::seed_from_u64(5);
        let first = generate_puzzle(&catalog, 9, 1..=3, &mut rng);
        for _ in 0..50 {
            let next = regenerate_puzzle(&catalog, 9, 1..=3, &first, &mut rng);
            assert!(next.target() != first.target() || next.images() != first.images());
        }
    }
}
