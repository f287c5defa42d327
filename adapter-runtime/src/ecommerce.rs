//! Canonical ecommerce events
//!
//! Track calls whose event name matches one of these entries can be routed to
//! a dedicated handler instead of the generic track handler. Matching ignores
//! case and tolerates a single space or underscore between words, so
//! `Viewed Product`, `viewed_product` and `viewedProduct` are the same event.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ecommerce event with a routable handler slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EcommerceEvent {
    /// Removed Product
    RemovedProduct,
    /// Viewed Product
    ViewedProduct,
    /// Viewed Product Category
    ViewedProductCategory,
    /// Added Product
    AddedProduct,
    /// Completed Order
    CompletedOrder,
    /// Started Order
    StartedOrder,
    /// Updated Order
    UpdatedOrder,
    /// Refunded Order
    RefundedOrder,
    /// Viewed Product Details
    ViewedProductDetails,
    /// Clicked Product
    ClickedProduct,
    /// Viewed Promotion
    ViewedPromotion,
    /// Clicked Promotion
    ClickedPromotion,
    /// Viewed Checkout Step
    ViewedCheckoutStep,
    /// Completed Checkout Step
    CompletedCheckoutStep,
    /// Promotion Viewed
    PromotionViewed,
    /// Promotion Clicked
    PromotionClicked,
    /// Products Searched
    ProductsSearched,
    /// Product List Viewed
    ProductListViewed,
    /// Product List Filtered
    ProductListFiltered,
    /// Product Clicked
    ProductClicked,
    /// Product Viewed
    ProductViewed,
    /// Product Added
    ProductAdded,
    /// Product Removed
    ProductRemoved,
    /// Cart Viewed
    CartViewed,
    /// Checkout Started
    CheckoutStarted,
    /// Checkout Step Viewed
    CheckoutStepViewed,
    /// Checkout Step Completed
    CheckoutStepCompleted,
    /// Payment Info Entered
    PaymentInfoEntered,
    /// Order Updated
    OrderUpdated,
    /// Order Completed
    OrderCompleted,
    /// Order Refunded
    OrderRefunded,
    /// Order Cancelled
    OrderCancelled,
    /// Coupon Entered
    CouponEntered,
    /// Coupon Applied
    CouponApplied,
    /// Coupon Denied
    CouponDenied,
    /// Coupon Removed
    CouponRemoved,
    /// Product Added to Wishlist
    ProductAddedToWishlist,
    /// Product Removed from Wishlist
    ProductRemovedFromWishlist,
    /// Wishlist Product Added to Cart
    WishlistProductAddedToCart,
    /// Product Shared
    ProductShared,
    /// Cart Shared
    CartShared,
    /// Product Reviewed
    ProductReviewed,
}

impl EcommerceEvent {
    /// Routing order; the first matching entry with a handler wins
    pub const ALL: [EcommerceEvent; 42] = [
        EcommerceEvent::RemovedProduct,
        EcommerceEvent::ViewedProduct,
        EcommerceEvent::ViewedProductCategory,
        EcommerceEvent::AddedProduct,
        EcommerceEvent::CompletedOrder,
        EcommerceEvent::StartedOrder,
        EcommerceEvent::UpdatedOrder,
        EcommerceEvent::RefundedOrder,
        EcommerceEvent::ViewedProductDetails,
        EcommerceEvent::ClickedProduct,
        EcommerceEvent::ViewedPromotion,
        EcommerceEvent::ClickedPromotion,
        EcommerceEvent::ViewedCheckoutStep,
        EcommerceEvent::CompletedCheckoutStep,
        EcommerceEvent::PromotionViewed,
        EcommerceEvent::PromotionClicked,
        EcommerceEvent::ProductsSearched,
        EcommerceEvent::ProductListViewed,
        EcommerceEvent::ProductListFiltered,
        EcommerceEvent::ProductClicked,
        EcommerceEvent::ProductViewed,
        EcommerceEvent::ProductAdded,
        EcommerceEvent::ProductRemoved,
        EcommerceEvent::CartViewed,
        EcommerceEvent::CheckoutStarted,
        EcommerceEvent::CheckoutStepViewed,
        EcommerceEvent::CheckoutStepCompleted,
        EcommerceEvent::PaymentInfoEntered,
        EcommerceEvent::OrderUpdated,
        EcommerceEvent::OrderCompleted,
        EcommerceEvent::OrderRefunded,
        EcommerceEvent::OrderCancelled,
        EcommerceEvent::CouponEntered,
        EcommerceEvent::CouponApplied,
        EcommerceEvent::CouponDenied,
        EcommerceEvent::CouponRemoved,
        EcommerceEvent::ProductAddedToWishlist,
        EcommerceEvent::ProductRemovedFromWishlist,
        EcommerceEvent::WishlistProductAddedToCart,
        EcommerceEvent::ProductShared,
        EcommerceEvent::CartShared,
        EcommerceEvent::ProductReviewed,
    ];

    /// Words making up the canonical event name
    pub fn words(&self) -> &'static [&'static str] {
        use EcommerceEvent::*;

        match self {
            RemovedProduct => &["removed", "product"],
            ViewedProduct => &["viewed", "product"],
            ViewedProductCategory => &["viewed", "product", "category"],
            AddedProduct => &["added", "product"],
            CompletedOrder => &["completed", "order"],
            StartedOrder => &["started", "order"],
            UpdatedOrder => &["updated", "order"],
            RefundedOrder => &["refunded", "order"],
            ViewedProductDetails => &["viewed", "product", "details"],
            ClickedProduct => &["clicked", "product"],
            ViewedPromotion => &["viewed", "promotion"],
            ClickedPromotion => &["clicked", "promotion"],
            ViewedCheckoutStep => &["viewed", "checkout", "step"],
            CompletedCheckoutStep => &["completed", "checkout", "step"],
            PromotionViewed => &["promotion", "viewed"],
            PromotionClicked => &["promotion", "clicked"],
            ProductsSearched => &["products", "searched"],
            ProductListViewed => &["product", "list", "viewed"],
            ProductListFiltered => &["product", "list", "filtered"],
            ProductClicked => &["product", "clicked"],
            ProductViewed => &["product", "viewed"],
            ProductAdded => &["product", "added"],
            ProductRemoved => &["product", "removed"],
            CartViewed => &["cart", "viewed"],
            CheckoutStarted => &["checkout", "started"],
            CheckoutStepViewed => &["checkout", "step", "viewed"],
            CheckoutStepCompleted => &["checkout", "step", "completed"],
            PaymentInfoEntered => &["payment", "info", "entered"],
            OrderUpdated => &["order", "updated"],
            OrderCompleted => &["order", "completed"],
            OrderRefunded => &["order", "refunded"],
            OrderCancelled => &["order", "cancelled"],
            CouponEntered => &["coupon", "entered"],
            CouponApplied => &["coupon", "applied"],
            CouponDenied => &["coupon", "denied"],
            CouponRemoved => &["coupon", "removed"],
            ProductAddedToWishlist => &["product", "added", "to", "wishlist"],
            ProductRemovedFromWishlist => &["product", "removed", "from", "wishlist"],
            WishlistProductAddedToCart => &["wishlist", "product", "added", "to", "cart"],
            ProductShared => &["product", "shared"],
            CartShared => &["cart", "shared"],
            ProductReviewed => &["product", "reviewed"],
        }
    }

    /// Whether `event` names this ecommerce event
    pub fn matches(&self, event: &str) -> bool {
        ROUTES
            .iter()
            .find(|(candidate, _)| candidate == self)
            .map(|(_, pattern)| pattern.is_match(event))
            .unwrap_or(false)
    }

    /// Every ecommerce event matching `event`, in routing order
    pub fn route(event: &str) -> impl Iterator<Item = EcommerceEvent> + '_ {
        ROUTES
            .iter()
            .filter(move |(_, pattern)| pattern.is_match(event))
            .map(|(candidate, _)| *candidate)
    }

    fn pattern(&self) -> String {
        format!("(?i)^[ _]?{}[ _]?$", self.words().join("[ _]?"))
    }
}

impl fmt::Display for EcommerceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title: Vec<String> = self
            .words()
            .iter()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect();
        f.write_str(&title.join(" "))
    }
}

lazy_static! {
    static ref ROUTES: Vec<(EcommerceEvent, Regex)> = EcommerceEvent::ALL
        .iter()
        .map(|event| (*event, Regex::new(&event.pattern()).unwrap()))
        .collect();
}
