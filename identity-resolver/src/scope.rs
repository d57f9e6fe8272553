//! Dedup scopes: which records may be compared with which.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use thiserror::Error;

use crate::types::ProductType;

/// Rule scope tag that admits every product.
pub const ALL_TAG: &str = "all";

/// Rule scope tag for the consumer-loan products. Employee loans are not
/// consumer loans.
pub const ALL_CL_TAG: &str = "all_cl";

pub const CL_PRODUCTS: [ProductType; 4] = [
    ProductType::Loyalty,
    ProductType::Preapproved,
    ProductType::EAggregator,
    ProductType::TopUp,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeGroupsError {
    #[error("malformed scope group definition '{0}', expected name=product[,product]")]
    Malformed(String),
    #[error("unknown product type '{product}' in scope group '{group}'")]
    UnknownProduct { group: String, product: String },
    #[error("product type {product} is assigned to both '{first}' and '{second}'")]
    Overlap {
        product: ProductType,
        first: String,
        second: String,
    },
    #[error("scope group name '{0}' is reserved")]
    Reserved(String),
}

/// The configured partition of offer types into dedup scope groups.
///
/// Every product belongs to exactly one group. Products the configuration
/// does not mention get a singleton group named after themselves, so an
/// unconfigured product is never compared with another product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeGroups {
    groups: BTreeMap<String, BTreeSet<ProductType>>,
    by_product: HashMap<ProductType, String>,
}

impl ScopeGroups {
    /// Parses `name=product[,product];name=product...`.
    pub fn parse(definition: &str) -> Result<Self, ScopeGroupsError> {
        let mut groups: BTreeMap<String, BTreeSet<ProductType>> = BTreeMap::new();
        let mut by_product: HashMap<ProductType, String> = HashMap::new();

        for entry in definition.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, products) = entry
                .split_once('=')
                .ok_or_else(|| ScopeGroupsError::Malformed(entry.to_string()))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(ScopeGroupsError::Malformed(entry.to_string()));
            }
            if name == ALL_TAG || name == ALL_CL_TAG {
                return Err(ScopeGroupsError::Reserved(name.to_string()));
            }

            for product in products.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let product_type =
                    ProductType::parse(product).ok_or_else(|| ScopeGroupsError::UnknownProduct {
                        group: name.to_string(),
                        product: product.to_string(),
                    })?;
                if let Some(first) = by_product.get(&product_type) {
                    if first != name {
                        return Err(ScopeGroupsError::Overlap {
                            product: product_type,
                            first: first.clone(),
                            second: name.to_string(),
                        });
                    }
                }
                by_product.insert(product_type, name.to_string());
                groups
                    .entry(name.to_string())
                    .or_default()
                    .insert(product_type);
            }
        }

        for product in ProductType::ALL {
            by_product.entry(product).or_insert_with(|| {
                groups
                    .entry(product.as_str().to_string())
                    .or_default()
                    .insert(product);
                product.as_str().to_string()
            });
        }

        Ok(Self { groups, by_product })
    }

    pub fn group_of(&self, product: ProductType) -> &str {
        self.by_product
            .get(&product)
            .map(String::as_str)
            .unwrap_or_else(|| product.as_str())
    }

    pub fn members(&self, group: &str) -> Option<&BTreeSet<ProductType>> {
        self.groups.get(group)
    }

    /// The scope an offer of this type is deduplicated within.
    pub fn offer_scope(&self, product: ProductType) -> DedupScope {
        let group = self.group_of(product);
        let products = self
            .members(group)
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([product]));
        DedupScope::products(group, products)
    }

    /// Resolves a rule scope tag. `None` or `all` admits everything, `all_cl`
    /// the consumer-loan products; a group name admits that group's
    /// products; anything else is treated as a single product name, and an
    /// unknown tag admits nothing.
    pub fn resolve_tag(&self, tag: Option<&str>) -> DedupScope {
        let Some(tag) = tag.map(str::trim).filter(|t| !t.is_empty()) else {
            return DedupScope::all();
        };
        if tag == ALL_TAG {
            return DedupScope::all();
        }
        if tag == ALL_CL_TAG {
            return DedupScope::products(ALL_CL_TAG, BTreeSet::from(CL_PRODUCTS));
        }
        if let Some(products) = self.members(tag) {
            return DedupScope::products(tag, products.clone());
        }
        match ProductType::parse(tag) {
            Some(product) => DedupScope::products(tag, BTreeSet::from([product])),
            None => DedupScope::products(tag, BTreeSet::new()),
        }
    }
}

impl Default for ScopeGroups {
    fn default() -> Self {
        Self::parse("").expect("empty scope group definition is valid")
    }
}

/// A set of products within which a duplicate comparison is valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupScope {
    label: String,
    products: Option<BTreeSet<ProductType>>,
}

impl DedupScope {
    pub fn all() -> Self {
        Self {
            label: "all".to_string(),
            products: None,
        }
    }

    pub fn products(label: impl Into<String>, products: BTreeSet<ProductType>) -> Self {
        Self {
            label: label.into(),
            products: Some(products),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_unscoped(&self) -> bool {
        self.products.is_none()
    }

    pub fn admits(&self, product: ProductType) -> bool {
        match &self.products {
            None => true,
            Some(products) => products.contains(&product),
        }
    }

    /// Products admitted by both scopes. Keeps this scope's label unless
    /// `other` actually narrows it.
    pub fn narrowed_by(&self, other: &DedupScope) -> DedupScope {
        match (&self.products, &other.products) {
            (_, None) => self.clone(),
            (None, Some(_)) => other.clone(),
            (Some(own), Some(theirs)) => {
                let common: BTreeSet<ProductType> = own.intersection(theirs).copied().collect();
                if common == *own {
                    self.clone()
                } else {
                    DedupScope::products(other.label.clone(), common)
                }
            }
        }
    }

    pub fn admits_any<'a>(&self, products: impl IntoIterator<Item = &'a ProductType>) -> bool {
        match &self.products {
            None => true,
            Some(allowed) => products.into_iter().any(|p| allowed.contains(p)),
        }
    }
}

impl fmt::Display for DedupScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}
