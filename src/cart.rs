//! In-memory multi-vendor cart state.
//!
//! Pure data and synchronous mutations only; no I/O. The effectful half
//! (cloud push/pull) lives in `cart_sync`. Keeping this layer pure makes
//! every invariant unit-testable without network mocking.
//!
//! Invariants maintained by every mutation:
//! - no `VendorCart` with zero lines survives a mutation
//! - no `CartLine` ever has quantity 0
//! - line ids are unique within one vendor's cart
//! - print-job lines are never quantity-merged; each submission is its
//!   own line with a process-generated id

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Vendors
// ---------------------------------------------------------------------------

/// Campus service providers. Partitions both the cart and the order space.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Canteen,
    Stationery,
    Library,
    Office,
    /// Sentinel for items that arrive without a vendor tag.
    #[default]
    #[serde(other)]
    Default,
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Canteen => "canteen",
            Self::Stationery => "stationery",
            Self::Library => "library",
            Self::Office => "office",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Lines and documents
// ---------------------------------------------------------------------------

/// Structured options attached to a print-job line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintingOptions {
    /// Number of copies, at least 1.
    pub copies: u32,
    /// "bw" or "color".
    pub color_mode: String,
    /// "single" or "double".
    pub duplex: String,
    pub page_size: String,
    pub page_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// One product or print line inside one vendor's cart.
///
/// For ordinary products `id` equals the product identifier; for print
/// jobs it is a freshly generated UUID unique within the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    #[serde(rename = "price")]
    pub unit_price: f64,
    pub quantity: u32,
    #[serde(default)]
    pub vendor: Vendor,
    #[serde(default, rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub is_print_item: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printing_options: Option<PrintingOptions>,
}

/// Metadata for an uploaded document backing a print-job line.
///
/// `cart_line_id` is a non-owning association: removing the line does not
/// require the document to exist and vice versa, but `remove_document`
/// co-deletes both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printing_options: Option<PrintingOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cart_line_id: Option<String>,
}

/// One vendor's cart: the vendor tag plus an ordered list of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorCart {
    pub vendor: Vendor,
    pub items: Vec<CartLine>,
}

impl VendorCart {
    /// Subtotal for this cart. Each line's amount is rounded to the
    /// currency's two decimal places before summing so repeated adds do
    /// not accumulate float drift.
    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(|l| round2(l.unit_price * f64::from(l.quantity))).sum()
    }
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// The whole local cart state: at most one cart per vendor plus the flat
/// list of uploaded print documents.
///
/// Created empty at session start, mutated by UI actions, and replaced
/// wholesale by `cart_sync::CartSyncEngine::pull`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorCartCollection {
    carts: BTreeMap<Vendor, VendorCart>,
    documents: Vec<DocumentRecord>,
}

impl VendorCartCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a line to `vendor`'s cart, creating the cart if absent.
    ///
    /// Print-job lines always append as a new line under a fresh id; if
    /// the line carries printing options a paired [`DocumentRecord`]
    /// (sharing the new line's id) is appended. Ordinary products with an
    /// id already present merge by incrementing quantity.
    ///
    /// Returns the id the line ended up with.
    pub fn add_line(&mut self, vendor: Vendor, mut line: CartLine) -> String {
        line.vendor = vendor;
        if line.quantity == 0 {
            line.quantity = 1;
        }

        if line.is_print_item {
            let id = Uuid::new_v4().to_string();
            line.id = id.clone();
            if let Some(opts) = line.printing_options.clone() {
                self.documents.push(DocumentRecord {
                    id: id.clone(),
                    name: line.name.clone(),
                    url: line.image_ref.clone().unwrap_or_default(),
                    printing_options: Some(opts),
                    cart_line_id: Some(id.clone()),
                });
            }
            self.cart_mut(vendor).items.push(line);
            return id;
        }

        let cart = self.cart_mut(vendor);
        if let Some(existing) = cart.items.iter_mut().find(|l| l.id == line.id) {
            existing.quantity += 1;
            return existing.id.clone();
        }
        let id = line.id.clone();
        cart.items.push(line);
        id
    }

    /// Delete a line; drops the vendor's cart when it becomes empty.
    /// Unknown vendor/id is a no-op. Returns whether anything changed.
    pub fn remove_line(&mut self, vendor: Vendor, line_id: &str) -> bool {
        let Some(cart) = self.carts.get_mut(&vendor) else {
            return false;
        };
        let before = cart.items.len();
        cart.items.retain(|l| l.id != line_id);
        let removed = cart.items.len() != before;
        if cart.items.is_empty() {
            self.carts.remove(&vendor);
        }
        if removed {
            // Keep print metadata in step with its line.
            self.documents
                .retain(|d| d.cart_line_id.as_deref() != Some(line_id));
        }
        removed
    }

    /// Adjust a line's quantity by `delta`; a result of zero or less
    /// removes the line. Unknown vendor/id is a no-op.
    pub fn change_quantity(&mut self, vendor: Vendor, line_id: &str, delta: i32) -> bool {
        let Some(cart) = self.carts.get_mut(&vendor) else {
            return false;
        };
        let Some(line) = cart.items.iter_mut().find(|l| l.id == line_id) else {
            return false;
        };
        let next = i64::from(line.quantity) + i64::from(delta);
        if next <= 0 {
            return self.remove_line(vendor, line_id);
        }
        line.quantity = next as u32;
        true
    }

    /// Drop one vendor's cart, or every cart when `vendor` is `None`.
    /// Documents paired with a removed line go with it, as in
    /// [`Self::remove_line`]; nothing keeps a dangling back-reference.
    pub fn clear(&mut self, vendor: Option<Vendor>) -> bool {
        let removed: Vec<String> = match vendor {
            Some(v) => match self.carts.remove(&v) {
                Some(cart) => cart.items.into_iter().map(|l| l.id).collect(),
                None => return false,
            },
            None => {
                if self.carts.is_empty() {
                    return false;
                }
                std::mem::take(&mut self.carts)
                    .into_values()
                    .flat_map(|c| c.items)
                    .map(|l| l.id)
                    .collect()
            }
        };
        self.documents.retain(|d| {
            d.cart_line_id
                .as_deref()
                .map_or(true, |id| !removed.iter().any(|r| r == id))
        });
        true
    }

    /// Delete a document and any cart line whose id equals it, so a
    /// print job and its metadata disappear together.
    pub fn remove_document(&mut self, id: &str) -> bool {
        let before = self.documents.len();
        self.documents.retain(|d| d.id != id);
        let mut changed = self.documents.len() != before;
        let vendors: Vec<Vendor> = self.carts.keys().copied().collect();
        for vendor in vendors {
            if self.remove_line_only(vendor, id) {
                changed = true;
            }
        }
        changed
    }

    /// Replace the entire collection (pull-from-cloud path).
    pub fn replace(&mut self, carts: Vec<VendorCart>, documents: Vec<DocumentRecord>) {
        self.carts = carts
            .into_iter()
            .filter(|c| !c.items.is_empty())
            .map(|c| (c.vendor, c))
            .collect();
        self.documents = documents;
    }

    // Line removal without the document co-delete, used by remove_document
    // to avoid retain-while-iterating over the documents list.
    fn remove_line_only(&mut self, vendor: Vendor, line_id: &str) -> bool {
        let Some(cart) = self.carts.get_mut(&vendor) else {
            return false;
        };
        let before = cart.items.len();
        cart.items.retain(|l| l.id != line_id);
        let removed = cart.items.len() != before;
        if cart.items.is_empty() {
            self.carts.remove(&vendor);
        }
        removed
    }

    fn cart_mut(&mut self, vendor: Vendor) -> &mut VendorCart {
        self.carts.entry(vendor).or_insert_with(|| VendorCart {
            vendor,
            items: Vec::new(),
        })
    }

    // -- derived reads ------------------------------------------------------

    pub fn lines_for(&self, vendor: Vendor) -> &[CartLine] {
        self.carts.get(&vendor).map(|c| c.items.as_slice()).unwrap_or(&[])
    }

    pub fn all_carts(&self) -> Vec<&VendorCart> {
        self.carts.values().collect()
    }

    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.carts.is_empty()
    }

    /// Sum of quantities across all carts.
    pub fn total_line_count(&self) -> u32 {
        self.carts
            .values()
            .flat_map(|c| c.items.iter())
            .map(|l| l.quantity)
            .sum()
    }

    /// Per-vendor subtotals, each line rounded to two decimals.
    pub fn totals_by_vendor(&self) -> BTreeMap<Vendor, f64> {
        self.carts
            .iter()
            .map(|(v, c)| (*v, c.subtotal()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, name: &str, price: f64) -> CartLine {
        CartLine {
            id: id.into(),
            name: name.into(),
            unit_price: price,
            quantity: 1,
            vendor: Vendor::Default,
            image_ref: None,
            is_print_item: false,
            printing_options: None,
        }
    }

    fn print_job(name: &str) -> CartLine {
        CartLine {
            id: String::new(),
            name: name.into(),
            unit_price: 1.5,
            quantity: 1,
            vendor: Vendor::Default,
            image_ref: Some("https://cdn.campusgo.app/docs/notes.pdf".into()),
            is_print_item: true,
            printing_options: Some(PrintingOptions {
                copies: 2,
                color_mode: "bw".into(),
                duplex: "double".into(),
                page_size: "A4".into(),
                page_count: 12,
                note: None,
            }),
        }
    }

    fn assert_invariants(c: &VendorCartCollection) {
        for cart in c.all_carts() {
            assert!(!cart.items.is_empty(), "empty cart left in collection");
            for line in &cart.items {
                assert!(line.quantity >= 1, "zero-quantity line survived");
            }
            let mut ids: Vec<&str> = cart.items.iter().map(|l| l.id.as_str()).collect();
            ids.sort_unstable();
            ids.dedup();
            assert_eq!(ids.len(), cart.items.len(), "duplicate line id in one cart");
        }
    }

    #[test]
    fn repeated_add_merges_by_quantity() {
        let mut c = VendorCartCollection::new();
        for _ in 0..3 {
            c.add_line(Vendor::Canteen, product("tea-1", "Tea", 10.0));
        }
        let lines = c.lines_for(Vendor::Canteen);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 3);
        assert_eq!(c.total_line_count(), 3);
        assert_invariants(&c);
    }

    #[test]
    fn print_jobs_never_merge_and_pair_documents() {
        let mut c = VendorCartCollection::new();
        let first = c.add_line(Vendor::Stationery, print_job("notes.pdf"));
        let second = c.add_line(Vendor::Stationery, print_job("notes.pdf"));
        assert_ne!(first, second);

        assert_eq!(c.lines_for(Vendor::Stationery).len(), 2);
        assert_eq!(c.documents().len(), 2);
        assert_eq!(c.documents()[0].cart_line_id.as_deref(), Some(first.as_str()));

        // Co-deletion removes exactly the targeted pair.
        assert!(c.remove_document(&first));
        assert_eq!(c.lines_for(Vendor::Stationery).len(), 1);
        assert_eq!(c.documents().len(), 1);
        assert_eq!(c.lines_for(Vendor::Stationery)[0].id, second);
        assert_invariants(&c);
    }

    #[test]
    fn quantity_zero_removes_line_and_empty_cart() {
        let mut c = VendorCartCollection::new();
        c.add_line(Vendor::Canteen, product("tea-1", "Tea", 10.0));
        assert!(c.change_quantity(Vendor::Canteen, "tea-1", 2));
        assert_eq!(c.lines_for(Vendor::Canteen)[0].quantity, 3);

        assert!(c.change_quantity(Vendor::Canteen, "tea-1", -3));
        assert!(c.is_empty());
        assert_invariants(&c);
    }

    #[test]
    fn remove_last_line_drops_the_cart() {
        let mut c = VendorCartCollection::new();
        c.add_line(Vendor::Library, product("late-fee", "Late fee", 5.0));
        assert!(c.remove_line(Vendor::Library, "late-fee"));
        assert!(c.all_carts().is_empty());
        assert_invariants(&c);
    }

    #[test]
    fn unknown_ids_and_vendors_are_noops() {
        let mut c = VendorCartCollection::new();
        c.add_line(Vendor::Canteen, product("tea-1", "Tea", 10.0));
        let snapshot = c.clone();

        assert!(!c.remove_line(Vendor::Canteen, "nope"));
        assert!(!c.remove_line(Vendor::Office, "tea-1"));
        assert!(!c.change_quantity(Vendor::Canteen, "nope", 1));
        assert!(!c.clear(Some(Vendor::Office)));
        assert!(!c.remove_document("nope"));
        assert_eq!(c, snapshot);
    }

    #[test]
    fn totals_by_vendor_rounds_per_line() {
        let mut c = VendorCartCollection::new();
        c.add_line(Vendor::Canteen, product("tea-1", "Tea", 10.0));
        c.change_quantity(Vendor::Canteen, "tea-1", 1);
        c.add_line(Vendor::Canteen, product("samosa-1", "Samosa", 15.0));
        c.add_line(Vendor::Stationery, product("pen-1", "Pen", 0.1));

        let totals = c.totals_by_vendor();
        assert_eq!(totals[&Vendor::Canteen], 35.0);
        assert_eq!(totals[&Vendor::Stationery], 0.1);
    }

    #[test]
    fn clear_scopes_to_one_vendor_or_all() {
        let mut c = VendorCartCollection::new();
        c.add_line(Vendor::Canteen, product("tea-1", "Tea", 10.0));
        c.add_line(Vendor::Office, product("form-7", "Form 7", 1.0));

        assert!(c.clear(Some(Vendor::Canteen)));
        assert!(c.lines_for(Vendor::Canteen).is_empty());
        assert_eq!(c.lines_for(Vendor::Office).len(), 1);

        assert!(c.clear(None));
        assert!(c.is_empty());
    }

    #[test]
    fn clear_takes_paired_documents_with_the_lines() {
        let mut c = VendorCartCollection::new();
        let cleared = c.add_line(Vendor::Stationery, print_job("notes.pdf"));
        let kept = c.add_line(Vendor::Office, print_job("form.pdf"));
        c.add_line(Vendor::Canteen, product("tea-1", "Tea", 10.0));

        assert!(c.clear(Some(Vendor::Stationery)));
        let remaining: Vec<_> = c
            .documents()
            .iter()
            .filter_map(|d| d.cart_line_id.as_deref())
            .collect();
        assert!(!remaining.contains(&cleared.as_str()), "no dangling document");
        assert_eq!(remaining, vec![kept.as_str()]);

        assert!(c.clear(None));
        assert!(c.is_empty());
        assert!(c.documents().is_empty());
        assert_invariants(&c);
    }

    #[test]
    fn wire_shape_uses_server_field_names() {
        let line = product("tea-1", "Tea", 10.0);
        let v = serde_json::to_value(&line).unwrap();
        assert_eq!(v["_id"], "tea-1");
        assert_eq!(v["price"], 10.0);
        assert_eq!(v["vendor"], "default");
        // Optional fields stay off the wire when unset.
        assert!(v.get("imageUrl").is_none());

        let back: CartLine = serde_json::from_value(v).unwrap();
        assert_eq!(back, line);
    }

    #[test]
    fn unknown_vendor_tag_maps_to_default() {
        let line: CartLine = serde_json::from_value(serde_json::json!({
            "_id": "x",
            "name": "Mystery",
            "price": 1.0,
            "quantity": 1,
            "vendor": "bookbinding"
        }))
        .unwrap();
        assert_eq!(line.vendor, Vendor::Default);

        let missing: CartLine = serde_json::from_value(serde_json::json!({
            "_id": "y",
            "name": "No vendor",
            "price": 1.0,
            "quantity": 1
        }))
        .unwrap();
        assert_eq!(missing.vendor, Vendor::Default);
    }
}
