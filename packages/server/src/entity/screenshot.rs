use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "screenshots")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub url: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}

impl super::ImageRecord for Model {
    fn candidate_urls(&self) -> Vec<&str> {
        super::present(&self.url).into_iter().collect()
    }
}
