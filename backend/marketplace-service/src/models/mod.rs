mod enhanced;
mod interaction;
mod profile;
mod screen;
mod section;

pub use enhanced::{
    AudienceInsights, BookingFrequency, EngagementMetrics, EnhancedScreen, PerformanceMetrics,
    TrendDirection,
};
pub use interaction::{Interaction, InteractionAction, InteractionContext, InteractionDetail};
pub use profile::{
    AccessibilitySettings, BudgetRange, CategoryPreference, DisplaySettings, InteractionSummary,
    LocationPreference, NotificationSettings, PrivacySettings, PurchaseSummary, UserProfile,
    UserSettings,
};
pub use screen::{
    price_band, RawScreen, Screen, ScreenCategory, ScreenContext, ScreenFilters, ScreenLocation,
};
pub use section::{
    AlgorithmType, CardSize, DisplayConfig, DisplayType, MarketplaceSection, SectionConditions,
    SectionConfig, SectionConfigPatch, SectionMetadata, UserContextSnapshot,
};
