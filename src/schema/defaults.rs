//! Default relation declaration for the booking domain.
//!
//! Entity types: `concert` (event), `artiste`, `lieu` (venue), `contact`
//! and `structure` (organization). Field names are the ones stored in the
//! existing collections, declared verbatim rather than derived.

use std::collections::BTreeMap;

use super::{CachePolicy, Cardinality, RelationDescriptor, RelationRegistry};

/// Entity type -> collection for the booking domain.
pub const BOOKING_COLLECTIONS: &[(&str, &str)] = &[
    ("artiste", "artistes"),
    ("concert", "concerts"),
    ("contact", "contacts"),
    ("lieu", "lieux"),
    ("structure", "structures"),
];

/// Relation declarations for the booking domain.
pub fn booking_relations() -> Vec<RelationDescriptor> {
    use Cardinality::{Array, Scalar};

    vec![
        // concert
        RelationDescriptor::array("concert", "artistes", "artiste", "artistesIds")
            .with_reverse("concertsIds", Array),
        RelationDescriptor::scalar("concert", "lieu", "lieu", "lieuId")
            .with_cached("lieuNom", "nom"),
        RelationDescriptor::array("concert", "contacts", "contact", "contactIds"),
        RelationDescriptor::scalar("concert", "structure", "structure", "structureId")
            .with_reverse("concertsIds", Array)
            .with_cached("structureNom", "nom"),
        // artiste
        RelationDescriptor::array("artiste", "concerts", "concert", "concertsIds")
            .with_reverse("artistesIds", Array),
        // lieu
        RelationDescriptor::reverse_query("lieu", "concerts", "concert", "lieuId", Scalar),
        RelationDescriptor::array("lieu", "contacts", "contact", "contactIds")
            .with_reverse("lieuxIds", Array),
        // contact
        RelationDescriptor::array("contact", "lieux", "lieu", "lieuxIds")
            .with_reverse("contactIds", Array),
        RelationDescriptor::scalar("contact", "structure", "structure", "structureId")
            .with_reverse("contactsIds", Array)
            .with_cached("structureNom", "nom")
            .with_cache_policy(CachePolicy::Retain),
        RelationDescriptor::reverse_query("contact", "concerts", "concert", "contactIds", Array),
        // structure
        RelationDescriptor::array("structure", "contacts", "contact", "contactsIds")
            .with_reverse("structureId", Scalar),
        RelationDescriptor::array("structure", "concerts", "concert", "concertsIds")
            .with_reverse("structureId", Scalar),
    ]
}

impl RelationRegistry {
    /// Registry for the booking domain.
    pub fn booking_defaults() -> Self {
        let collections: BTreeMap<String, String> = BOOKING_COLLECTIONS
            .iter()
            .map(|(entity_type, collection)| (entity_type.to_string(), collection.to_string()))
            .collect();

        Self::new(booking_relations(), collections).expect("booking declaration is valid")
    }
}
