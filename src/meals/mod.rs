pub mod model;
pub mod repo;
pub mod store;

pub use model::{Category, Macros, MealAnalysis, MealRecord, NewMeal};
pub use store::{Appended, InMemoryMealStore, MealStore, StoreError};
