use serde::Deserialize;
use serde::Serialize;
use teloxide::types::FileId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum ConversationState {
  #[default]
  Idle,
  AddProduct(ProductDraft),
  AddCategory {
    admin_tg_id: i64,
  },
  RemoveProduct {
    admin_tg_id: i64,
  },
  RemoveCategory {
    admin_tg_id: i64,
  },
  Broadcast {
    admin_tg_id: i64,
  },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProductDraft {
  pub stage: DraftStage,
  pub admin_tg_id: i64,
  pub image_file_ids: Vec<FileId>,
  pub category_id: Option<i64>,
  pub category_name: Option<String>,
  pub title: Option<String>,
  pub description: Option<String>,
  pub price_cents: Option<i64>,
  pub stock: Option<i64>,
}

impl ProductDraft {
  pub fn new(admin_tg_id: i64) -> Self {
    Self {
      stage: DraftStage::Category,
      admin_tg_id,
      image_file_ids: Vec::new(),
      category_id: None,
      category_name: None,
      title: None,
      description: None,
      price_cents: None,
      stock: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DraftStage {
  Category,
  Title,
  Description,
  Price,
  Stock,
}

#[cfg(test)]
mod tests {
  use super::DraftStage;
  use super::ProductDraft;

  #[test]
  fn new_draft_starts_with_category_stage() {
    let draft = ProductDraft::new(1);
    assert_eq!(draft.stage, DraftStage::Category);
    assert_eq!(draft.admin_tg_id, 1);
    assert!(draft.image_file_ids.is_empty());
    assert!(draft.price_cents.is_none());
    assert!(draft.stock.is_none());
  }
}
